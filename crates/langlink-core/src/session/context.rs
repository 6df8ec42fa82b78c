//! Per-session shared state.
//!
//! A `SessionContext` is shared by the reader, the writer, the watchdog,
//! dispatch workers and handlers of one session. The stash, the deferral
//! gate and the tracked tasks are written from more than one task; each
//! sits behind its own mutex.

use super::init::DeferralGate;
use super::SessionPhase;
use crate::context::ClientContext;
use crate::handler::SessionState;
use crate::poison::PoisonToken;
use crate::queue::OutboundQueue;
use crate::watchdog::Watchdog;
use crate::wire::{ControlMessage, Envelope, FieldMessage, Payload, UserMessage};
use crate::{LinkError, Result};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::watch;
use std::future::Future;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};
use uuid::Uuid;

/// State shared by every task of one session, and the handle handlers see.
pub struct SessionContext<S: SessionState> {
    id: Uuid,
    client: Arc<ClientContext<S>>,
    outbound: Arc<OutboundQueue>,
    watchdog: Arc<Watchdog>,
    poison: PoisonToken,
    phase: watch::Sender<SessionPhase>,
    stash: Mutex<Option<FieldMessage>>,
    state: OnceLock<S>,
    gate: Mutex<DeferralGate>,
    init_task: Mutex<Option<JoinHandle<()>>>,
    completions: Mutex<JoinSet<()>>,
}

impl<S: SessionState> SessionContext<S> {
    pub(crate) fn new(client: Arc<ClientContext<S>>) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Connecting);
        Self {
            id: Uuid::new_v4(),
            client,
            outbound: Arc::new(OutboundQueue::new()),
            watchdog: Arc::new(Watchdog::new()),
            poison: PoisonToken::new(),
            phase,
            stash: Mutex::new(None),
            state: OnceLock::new(),
            gate: Mutex::new(DeferralGate::default()),
            init_task: Mutex::new(None),
            completions: Mutex::new(JoinSet::new()),
        }
    }

    /// Unique id of this session, used in log spans.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &Arc<ClientContext<S>> {
        &self.client
    }

    /// Handler-owned state, once initialization has completed.
    pub fn state(&self) -> Option<&S> {
        self.state.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// The last stash snapshot set by either side.
    pub fn stash(&self) -> Option<FieldMessage> {
        lock(&self.stash).clone()
    }

    /// Replace the stash and hand it to the peer so it survives a host restart.
    ///
    /// The value is stored even when the session is already poisoned; the
    /// error only reports that the peer will not receive it.
    pub fn set_stash(&self, snapshot: FieldMessage) -> Result<()> {
        self.store_stash(snapshot.clone());
        if self.is_poisoned() {
            return Err(LinkError::SessionPoisoned);
        }
        self.outbound
            .push(Envelope::control(&ControlMessage::stash(snapshot)));
        Ok(())
    }

    /// Push an unsolicited user message to the peer.
    pub fn send(&self, payload: Payload) -> Result<()> {
        if self.is_poisoned() {
            return Err(LinkError::SessionPoisoned);
        }
        self.outbound
            .push(Envelope::user(&UserMessage::new(None, payload)));
        Ok(())
    }

    /// Begin session teardown. Idempotent and safe from any task.
    ///
    /// Sets the poisoned flag, queues the writer sentinel and releases the
    /// reader's hold on the input pipe.
    pub fn poison(&self) {
        if !self.poison.poison() {
            debug!("Session already poisoned");
            return;
        }
        info!("Poisoning session");
        self.set_phase(SessionPhase::Poisoning);
        self.outbound.push_sentinel();
    }

    pub fn is_poisoned(&self) -> bool {
        self.poison.is_poisoned()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Wait until the session has reached `phase` or any later one.
    pub async fn wait_for_phase(&self, phase: SessionPhase) {
        let mut receiver = self.phase.subscribe();
        let _ = receiver.wait_for(|current| *current >= phase).await;
    }

    /// Number of envelopes waiting for the writer.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    pub(crate) fn outbound(&self) -> &Arc<OutboundQueue> {
        &self.outbound
    }

    pub(crate) fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    pub(crate) fn poison_token(&self) -> &PoisonToken {
        &self.poison
    }

    /// Advance the lifecycle; backwards transitions are ignored.
    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_if_modified(|current| {
            if phase > *current {
                debug!("Session phase {} -> {}", current, phase);
                *current = phase;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn store_stash(&self, snapshot: FieldMessage) {
        *lock(&self.stash) = Some(snapshot);
    }

    /// Install the initialized state. Fails if state was already installed.
    pub(crate) fn install_state(&self, state: S) -> std::result::Result<(), S> {
        self.state.set(state)
    }

    pub(crate) fn gate(&self) -> MutexGuard<'_, DeferralGate> {
        lock(&self.gate)
    }

    pub(crate) fn track_init(&self, task: JoinHandle<()>) {
        *lock(&self.init_task) = Some(task);
    }

    pub(crate) fn take_init_task(&self) -> Option<JoinHandle<()>> {
        lock(&self.init_task).take()
    }

    /// Run an asynchronous handler completion on a task the drain joins.
    pub(crate) fn track_completion<F>(&self, completion: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut completions = lock(&self.completions);
        // Reap finished ones so the set does not grow with session age
        while completions.try_join_next().is_some() {}
        completions.spawn(completion);
    }

    /// Completions spawned and not yet joined.
    pub(crate) fn pending_completions(&self) -> usize {
        lock(&self.completions).len()
    }

    pub(crate) fn take_completions(&self) -> JoinSet<()> {
        std::mem::take(&mut *lock(&self.completions))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
