//! Collaborator interfaces: payload handlers and session-state factories.
//!
//! The engine only routes. What a payload means is decided by the handler
//! registered for its [`PayloadKind`] in the [`RoutingTable`]; what the
//! per-session state looks like is decided by the [`SessionStateFactory`].

use crate::session::SessionContext;
use crate::wire::{FieldMessage, Payload, PayloadKind};
use crate::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Bound for handler-owned session state.
pub trait SessionState: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> SessionState for T {}

/// Result of invoking a handler.
pub enum HandlerOutcome {
    /// Completed synchronously. `None` means the handler produced nothing.
    Ready(Option<Payload>),
    /// Will complete later; the engine replies when the future resolves.
    Pending(BoxFuture<'static, Result<Option<Payload>>>),
}

impl HandlerOutcome {
    pub fn reply(payload: Payload) -> Self {
        HandlerOutcome::Ready(Some(payload))
    }

    pub fn nothing() -> Self {
        HandlerOutcome::Ready(None)
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = Result<Option<Payload>>> + Send + 'static,
    {
        HandlerOutcome::Pending(Box::pin(future))
    }
}

impl std::fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutcome::Ready(payload) => f.debug_tuple("Ready").field(payload).finish(),
            HandlerOutcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Handles one payload kind.
///
/// Runs on a blocking-capable dispatch thread, never on the reader. Errors
/// and panics are contained by the dispatcher and turned into an empty reply.
pub trait PayloadHandler<S: SessionState>: Send + Sync + 'static {
    fn handle(&self, payload: Payload, session: &SessionContext<S>) -> Result<HandlerOutcome>;
}

impl<S, F> PayloadHandler<S> for F
where
    S: SessionState,
    F: Fn(Payload, &SessionContext<S>) -> Result<HandlerOutcome> + Send + Sync + 'static,
{
    fn handle(&self, payload: Payload, session: &SessionContext<S>) -> Result<HandlerOutcome> {
        self(payload, session)
    }
}

/// Payload kind to handler routing.
pub struct RoutingTable<S: SessionState> {
    handlers: HashMap<PayloadKind, Arc<dyn PayloadHandler<S>>>,
}

impl<S: SessionState> Default for RoutingTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S: SessionState> RoutingTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning any handler it replaced.
    pub fn register(
        &mut self,
        kind: PayloadKind,
        handler: Arc<dyn PayloadHandler<S>>,
    ) -> Option<Arc<dyn PayloadHandler<S>>> {
        self.handlers.insert(kind, handler)
    }

    pub fn route(&self, kind: &PayloadKind) -> Option<Arc<dyn PayloadHandler<S>>> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &PayloadKind> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Creates and tears down the handler-owned state of one session.
#[async_trait::async_trait]
pub trait SessionStateFactory<S: SessionState>: Send + Sync + 'static {
    /// Build the session state, warm from `stash` when one was exchanged.
    async fn init(&self, stash: Option<FieldMessage>) -> Result<S>;

    /// Release the session state after the session has drained.
    async fn teardown(&self, _state: &S) {}
}

/// Factory for sessions that keep no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoState;

#[async_trait::async_trait]
impl SessionStateFactory<()> for NoState {
    async fn init(&self, _stash: Option<FieldMessage>) -> Result<()> {
        Ok(())
    }
}
