//! Deferred initialization.
//!
//! The first heartbeat opens the deferral gate and starts the state factory
//! off the reader task. User messages arriving while the gate is open are
//! parked in arrival order. Once initialization finishes, successful or not,
//! the parked messages are handed to the dispatcher and the gate closes,
//! all under one lock, so no message can overtake one parked before it.

use super::route;
use super::SessionContext;
use crate::dispatch::{DispatchJob, Dispatcher};
use crate::handler::SessionState;
use crate::wire::{FieldMessage, UserMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Gate state guarded by the session's gate mutex.
#[derive(Default)]
pub(crate) struct DeferralGate {
    /// Initialization has been requested. Never reset.
    pub(crate) requested: bool,
    /// User messages must be parked rather than dispatched.
    pub(crate) open: bool,
    pub(crate) deferred: VecDeque<DispatchJob>,
}

/// Route a user message to the dispatcher, or park it while initialization runs.
pub(crate) fn defer_or_dispatch<S: SessionState>(
    context: &Arc<SessionContext<S>>,
    dispatcher: &Arc<Dispatcher>,
    message: UserMessage,
) {
    let job = route::dispatch_job(context.clone(), message);
    let mut gate = context.gate();
    if gate.open {
        gate.deferred.push_back(job);
        debug!("Deferred user message ({} waiting)", gate.deferred.len());
        return;
    }
    submit(dispatcher, job);
}

/// Start initialization on the first heartbeat. Later calls do nothing.
///
/// `stash` is the snapshot carried by the heartbeat, if any. Without one the
/// last stored stash seeds the factory.
pub(crate) fn request_initialization<S: SessionState>(
    context: &Arc<SessionContext<S>>,
    dispatcher: &Arc<Dispatcher>,
    stash: Option<FieldMessage>,
) {
    {
        let mut gate = context.gate();
        if gate.requested {
            return;
        }
        gate.requested = true;
        gate.open = true;
    }

    let seed = match stash {
        Some(snapshot) => {
            context.store_stash(snapshot.clone());
            Some(snapshot)
        }
        None => context.stash(),
    };

    let task = tokio::spawn(
        initialize(context.clone(), dispatcher.clone(), seed).in_current_span(),
    );
    context.track_init(task);
}

async fn initialize<S: SessionState>(
    context: Arc<SessionContext<S>>,
    dispatcher: Arc<Dispatcher>,
    seed: Option<FieldMessage>,
) {
    let warm = seed.is_some();
    match context.client().state_factory().init(seed).await {
        Ok(state) => {
            if context.install_state(state).is_err() {
                warn!("Session state was already initialized");
            }
            info!(
                "Session state initialized ({})",
                if warm { "from stash" } else { "cold start" }
            );
        }
        Err(e) => error!("Session state initialization failed: {}", e),
    }

    let mut gate = context.gate();
    let released = gate.deferred.len();
    while let Some(job) = gate.deferred.pop_front() {
        submit(&dispatcher, job);
    }
    gate.open = false;
    debug!("Released {} deferred user messages", released);
}

fn submit(dispatcher: &Dispatcher, job: DispatchJob) {
    if let Err(e) = dispatcher.submit(job) {
        debug!("Dropping user message: {}", e);
    }
}
