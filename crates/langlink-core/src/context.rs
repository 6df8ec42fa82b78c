//! Shared, immutable client context.
//!
//! One `ClientContext` is built at process start and shared by every
//! session: timeouts, the heartbeat envelope template, the dispatch pool
//! factory, the payload routing table and the session-state factory.

use crate::config::SessionSettings;
use crate::dispatch::Dispatcher;
use crate::handler::{PayloadHandler, RoutingTable, SessionState, SessionStateFactory};
use crate::wire::{ControlMessage, ControlOperation, Envelope, PayloadKind};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

type PoolFactory = Box<dyn Fn() -> Dispatcher + Send + Sync>;

/// Configuration shared across sessions. Never mutated after `build()`.
pub struct ClientContext<S: SessionState> {
    settings: SessionSettings,
    heartbeat: Envelope,
    pool_factory: PoolFactory,
    routes: RoutingTable<S>,
    state_factory: Arc<dyn SessionStateFactory<S>>,
}

impl<S: SessionState> ClientContext<S> {
    /// Start building a context around a session-state factory.
    pub fn builder(state_factory: impl SessionStateFactory<S>) -> ClientContextBuilder<S> {
        ClientContextBuilder::new(state_factory)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn message_timeout(&self) -> Duration {
        self.settings.message_timeout()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.settings.heartbeat_timeout()
    }

    pub fn termination_timeout(&self) -> Duration {
        self.settings.termination_timeout()
    }

    /// A copy of the pre-built heartbeat envelope.
    pub fn heartbeat(&self) -> Envelope {
        self.heartbeat.clone()
    }

    /// Create a fresh dispatch pool for a new session.
    pub fn new_pool(&self) -> Dispatcher {
        (self.pool_factory)()
    }

    pub fn route(&self, kind: &PayloadKind) -> Option<Arc<dyn PayloadHandler<S>>> {
        self.routes.route(kind)
    }

    pub fn routes(&self) -> &RoutingTable<S> {
        &self.routes
    }

    pub fn state_factory(&self) -> &Arc<dyn SessionStateFactory<S>> {
        &self.state_factory
    }
}

/// Builder for [`ClientContext`].
///
/// # Example
///
/// ```rust,ignore
/// use langlink_core::{ClientContext, NoState, PayloadKind};
///
/// let context = ClientContext::builder(NoState)
///     .heartbeat_timeout(Duration::from_millis(500))
///     .dispatch_workers(2)
///     .route(PayloadKind::Data, Arc::new(my_data_handler))
///     .build()?;
/// ```
pub struct ClientContextBuilder<S: SessionState> {
    settings: SessionSettings,
    pool_factory: Option<PoolFactory>,
    routes: RoutingTable<S>,
    state_factory: Arc<dyn SessionStateFactory<S>>,
}

impl<S: SessionState> ClientContextBuilder<S> {
    pub fn new(state_factory: impl SessionStateFactory<S>) -> Self {
        Self {
            settings: SessionSettings::default(),
            pool_factory: None,
            routes: RoutingTable::new(),
            state_factory: Arc::new(state_factory),
        }
    }

    /// Replace all settings at once (e.g. loaded from a file).
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.settings.message_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.settings.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn termination_timeout(mut self, timeout: Duration) -> Self {
        self.settings.termination_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Worker count for the default pool factory.
    pub fn dispatch_workers(mut self, workers: usize) -> Self {
        self.settings.dispatch_workers = workers;
        self
    }

    /// Override how each session's dispatch pool is created.
    pub fn pool_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Dispatcher + Send + Sync + 'static,
    {
        self.pool_factory = Some(Box::new(factory));
        self
    }

    /// Route a payload kind to a handler. Later registrations replace earlier ones.
    pub fn route(mut self, kind: PayloadKind, handler: Arc<dyn PayloadHandler<S>>) -> Self {
        self.routes.register(kind, handler);
        self
    }

    /// Validate the settings and freeze the context.
    pub fn build(self) -> Result<Arc<ClientContext<S>>> {
        self.settings.validate()?;

        let pool_factory = match self.pool_factory {
            Some(factory) => factory,
            None => {
                let workers = self.settings.dispatch_workers;
                Box::new(move || Dispatcher::new(workers)) as PoolFactory
            }
        };

        Ok(Arc::new(ClientContext {
            heartbeat: Envelope::control(&ControlMessage::new(ControlOperation::Heartbeat)),
            settings: self.settings,
            pool_factory,
            routes: self.routes,
            state_factory: self.state_factory,
        }))
    }
}
