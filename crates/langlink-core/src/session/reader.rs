//! Reader loop: reads envelopes off the input pipe and routes them.
//!
//! The reader never runs application code. Control traffic is handled
//! inline; user traffic becomes a dispatch job.

use super::init;
use super::SessionContext;
use crate::dispatch::Dispatcher;
use crate::handler::SessionState;
use crate::wire::{read_raw_envelope, ControlMessage, ControlOperation, Directive, UserMessage};
use crate::Result;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

/// Read until EOF, a read failure, a poison request or session poisoning.
///
/// Disconnects end the loop normally. Malformed framing or a malformed
/// control message is returned as an error. Malformed user traffic and
/// unknown directives are logged and dropped. Dropping `input`
/// on return closes the pipe.
pub(crate) async fn run<S, R>(
    mut input: R,
    context: &Arc<SessionContext<S>>,
    dispatcher: &Arc<Dispatcher>,
) -> Result<()>
where
    S: SessionState,
    R: AsyncRead + Unpin,
{
    let max_size = context.client().settings().max_envelope_size;
    let poison = context.poison_token().clone();

    loop {
        let read = tokio::select! {
            biased;
            _ = poison.poisoned() => {
                debug!("Reader released the input pipe");
                return Ok(());
            }
            read = read_raw_envelope(&mut input, max_size) => read,
        };

        let raw = match read {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("Peer closed the input pipe");
                return Ok(());
            }
            Err(e) if e.is_disconnect() => {
                info!("Input pipe read failed: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        context.watchdog().record_activity();

        // Bodies are decoded only for directives the reader acts on
        match raw.directive {
            Directive::Control => {
                let control = ControlMessage::from_fields(&raw.decode_body()?)?;
                if handle_control(context, dispatcher, control).is_break() {
                    return Ok(());
                }
            }
            Directive::User => {
                match raw
                    .decode_body()
                    .and_then(|body| UserMessage::from_fields(&body))
                {
                    Ok(message) => init::defer_or_dispatch(context, dispatcher, message),
                    Err(e) => warn!("Dropping malformed user message: {}", e),
                }
            }
            Directive::Other(value) => {
                warn!(
                    "Ignoring envelope with unknown directive {} ({} body bytes)",
                    value,
                    raw.body.len()
                )
            }
        }
    }
}

fn handle_control<S: SessionState>(
    context: &Arc<SessionContext<S>>,
    dispatcher: &Arc<Dispatcher>,
    control: ControlMessage,
) -> ControlFlow<()> {
    match control.operation {
        ControlOperation::Heartbeat => {
            // Any queued traffic already proves liveness to the peer
            if context.outbound().is_empty() {
                context.outbound().push(context.client().heartbeat());
            } else {
                debug!("Heartbeat reply suppressed, outbound traffic pending");
            }
            init::request_initialization(context, dispatcher, control.stash);
        }
        ControlOperation::Poison => {
            info!("Peer requested shutdown");
            context.poison();
            return ControlFlow::Break(());
        }
        ControlOperation::Stash => match control.stash {
            Some(snapshot) => {
                debug!("Stored stash from peer ({} fields)", snapshot.len());
                context.store_stash(snapshot);
            }
            None => warn!("Stash message carried no snapshot"),
        },
        ControlOperation::Other(operation) => {
            warn!("Ignoring unknown control operation {}", operation)
        }
    }
    ControlFlow::Continue(())
}
