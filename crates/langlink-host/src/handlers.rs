//! Demonstration handlers served by the host.
//!
//! - `echo` (custom): replies with the request payload
//! - `delayed-echo` (custom): same, completed asynchronously after a short delay
//! - function payloads: counts calls; the count survives restarts via the stash

use async_trait::async_trait;
use langlink_core::{
    ClientContext, FieldMessage, FieldValue, HandlerOutcome, LinkError, Payload, PayloadKind,
    Result, SessionContext, SessionSettings, SessionStateFactory,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Stash field holding the function call count.
const CALLS_ORDINAL: u16 = 1;

/// Function reply field holding the call count.
const COUNT_ORDINAL: u16 = 1;

const ECHO_DELAY: Duration = Duration::from_millis(50);

/// Per-session host state.
#[derive(Debug, Default)]
pub struct HostState {
    calls: AtomicI64,
}

impl HostState {
    pub fn calls(&self) -> i64 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Restores the call counter from the stash, when one was exchanged.
pub struct HostStateFactory;

#[async_trait]
impl SessionStateFactory<HostState> for HostStateFactory {
    async fn init(&self, stash: Option<FieldMessage>) -> Result<HostState> {
        let calls = stash
            .as_ref()
            .and_then(|snapshot| snapshot.get_i64(CALLS_ORDINAL))
            .unwrap_or(0);
        info!("Host state ready, {} earlier function calls", calls);
        Ok(HostState {
            calls: AtomicI64::new(calls),
        })
    }

    async fn teardown(&self, state: &HostState) {
        info!("Session served {} function calls in total", state.calls());
    }
}

fn echo(payload: Payload, _session: &SessionContext<HostState>) -> Result<HandlerOutcome> {
    Ok(HandlerOutcome::reply(payload))
}

fn delayed_echo(payload: Payload, _session: &SessionContext<HostState>) -> Result<HandlerOutcome> {
    Ok(HandlerOutcome::pending(async move {
        tokio::time::sleep(ECHO_DELAY).await;
        Ok(Some(payload))
    }))
}

fn count_calls(_payload: Payload, session: &SessionContext<HostState>) -> Result<HandlerOutcome> {
    let state = session
        .state()
        .ok_or_else(|| LinkError::handler("session state is not initialized"))?;
    let calls = state.calls.fetch_add(1, Ordering::SeqCst) + 1;

    session.set_stash(FieldMessage::new().with(CALLS_ORDINAL, FieldValue::I64(calls)))?;
    Ok(HandlerOutcome::reply(Payload::Function(
        FieldMessage::new().with(COUNT_ORDINAL, FieldValue::I64(calls)),
    )))
}

/// Build the host's client context from settings.
pub fn build_context(settings: SessionSettings) -> Result<Arc<ClientContext<HostState>>> {
    ClientContext::builder(HostStateFactory)
        .settings(settings)
        .route(PayloadKind::custom("echo"), Arc::new(echo))
        .route(PayloadKind::custom("delayed-echo"), Arc::new(delayed_echo))
        .route(PayloadKind::Function, Arc::new(count_calls))
        .build()
}
