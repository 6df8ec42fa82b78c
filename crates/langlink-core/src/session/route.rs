//! User-message handling on the dispatch pool.
//!
//! Handlers run on the blocking pool so a slow or synchronous handler never
//! stalls the reader or other sessions. A handler that fails, panics or
//! has no route still answers a correlated request, with an empty payload.
//! Asynchronous completions run on session-tracked tasks that the drain
//! waits for before teardown.

use super::SessionContext;
use crate::dispatch::DispatchJob;
use crate::handler::{HandlerOutcome, SessionState};
use crate::wire::{Envelope, Payload, UserMessage};
use crate::LinkError;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, Instrument};

/// Build the dispatch job for one inbound user message.
pub(crate) fn dispatch_job<S: SessionState>(
    context: Arc<SessionContext<S>>,
    message: UserMessage,
) -> DispatchJob {
    Box::pin(handle_user_message(context, message).in_current_span())
}

async fn handle_user_message<S: SessionState>(
    context: Arc<SessionContext<S>>,
    message: UserMessage,
) {
    let UserMessage { handle, payload } = message;
    let kind = payload.kind();

    let Some(handler) = context.client().route(&kind) else {
        error!(
            "{}",
            LinkError::Unrouted {
                kind: kind.to_string()
            }
        );
        reply(&context, handle, Some(Payload::Empty));
        return;
    };

    let session = context.clone();
    let invoked = tokio::task::spawn_blocking(move || handler.handle(payload, &session)).await;

    match invoked {
        Ok(Ok(HandlerOutcome::Ready(result))) => reply(&context, handle, result),
        Ok(Ok(HandlerOutcome::Pending(pending))) => {
            debug!("{} handler completes asynchronously", kind);
            let target = context.clone();
            let completion = async move {
                match AssertUnwindSafe(pending).catch_unwind().await {
                    Ok(Ok(result)) => reply(&target, handle, result),
                    Ok(Err(e)) => {
                        error!("Asynchronous {} handler failed: {}", kind, e);
                        reply(&target, handle, Some(Payload::Empty));
                    }
                    Err(_) => {
                        error!("Asynchronous {} handler panicked", kind);
                        reply(&target, handle, Some(Payload::Empty));
                    }
                }
            };
            context.track_completion(completion.in_current_span());
        }
        Ok(Err(e)) => {
            error!("{} handler failed: {}", kind, e);
            reply(&context, handle, Some(Payload::Empty));
        }
        Err(e) => {
            error!("{} handler panicked: {}", kind, e);
            reply(&context, handle, Some(Payload::Empty));
        }
    }
}

/// Queue the reply for a correlated request. Uncorrelated messages get none.
fn reply<S: SessionState>(context: &SessionContext<S>, handle: Option<i32>, result: Option<Payload>) {
    let Some(handle) = handle else { return };
    let payload = result.unwrap_or_else(|| {
        error!("Handler produced no result for handle {}, replying empty", handle);
        Payload::Empty
    });
    context
        .outbound()
        .push(Envelope::user(&UserMessage::new(Some(handle), payload)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ClientContext;
    use crate::handler::NoState;
    use crate::wire::{Directive, FieldMessage, FieldValue, PayloadKind};
    use crate::Result;

    fn session() -> Arc<SessionContext<()>> {
        let client = ClientContext::<()>::builder(NoState)
            .route(
                PayloadKind::Data,
                Arc::new(
                    |payload: Payload, _session: &SessionContext<()>| -> Result<HandlerOutcome> {
                        Ok(HandlerOutcome::reply(payload))
                    },
                ),
            )
            .route(
                PayloadKind::Function,
                Arc::new(
                    |_payload: Payload, _session: &SessionContext<()>| -> Result<HandlerOutcome> {
                        Err(LinkError::handler("bad input"))
                    },
                ),
            )
            .route(
                PayloadKind::Procedure,
                Arc::new(
                    |_payload: Payload, _session: &SessionContext<()>| -> Result<HandlerOutcome> {
                        panic!("handler bug")
                    },
                ),
            )
            .route(
                PayloadKind::custom("nothing"),
                Arc::new(
                    |_payload: Payload, _session: &SessionContext<()>| -> Result<HandlerOutcome> {
                        Ok(HandlerOutcome::nothing())
                    },
                ),
            )
            .route(
                PayloadKind::custom("later"),
                Arc::new(
                    |payload: Payload, _session: &SessionContext<()>| -> Result<HandlerOutcome> {
                        Ok(HandlerOutcome::pending(async move {
                            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                            Ok(Some(payload))
                        }))
                    },
                ),
            )
            .route(
                PayloadKind::custom("boom"),
                Arc::new(
                    |_payload: Payload, _session: &SessionContext<()>| -> Result<HandlerOutcome> {
                        Ok(HandlerOutcome::pending(async move {
                            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                            let missing: Option<Payload> = None;
                            Ok(Some(missing.expect("completion bug")))
                        }))
                    },
                ),
            )
            .build()
            .unwrap();
        Arc::new(SessionContext::new(client))
    }

    async fn run(context: &Arc<SessionContext<()>>, message: UserMessage) {
        dispatch_job(context.clone(), message).await;
    }

    fn next_reply(context: &SessionContext<()>) -> UserMessage {
        let envelope = context.outbound().try_pop().expect("expected a reply");
        assert_eq!(envelope.directive, Directive::User);
        UserMessage::from_fields(&envelope.body).unwrap()
    }

    fn data(value: i32) -> Payload {
        Payload::Data(FieldMessage::new().with(1, FieldValue::I32(value)))
    }

    #[tokio::test]
    async fn test_reply_carries_request_handle() {
        let context = session();
        run(&context, UserMessage::new(Some(7), data(1))).await;

        let reply = next_reply(&context);
        assert_eq!(reply.handle, Some(7));
        assert_eq!(reply.payload, data(1));
    }

    #[tokio::test]
    async fn test_uncorrelated_message_gets_no_reply() {
        let context = session();
        run(&context, UserMessage::new(None, data(1))).await;
        assert!(context.outbound().is_empty());
    }

    #[tokio::test]
    async fn test_failures_reply_empty() {
        let context = session();
        run(&context, UserMessage::new(Some(1), Payload::Function(FieldMessage::new()))).await;
        run(&context, UserMessage::new(Some(2), Payload::Procedure(FieldMessage::new()))).await;
        run(&context, UserMessage::new(Some(3), Payload::custom("unrouted", FieldMessage::new()))).await;
        run(&context, UserMessage::new(Some(4), Payload::custom("nothing", FieldMessage::new()))).await;

        for expected in 1..=4 {
            let reply = next_reply(&context);
            assert_eq!(reply.handle, Some(expected));
            assert_eq!(reply.payload, Payload::Empty);
        }
    }

    #[tokio::test]
    async fn test_pending_outcome_replies_on_completion() {
        let context = session();
        let body = FieldMessage::new().with(1, FieldValue::Str("later".into()));
        run(&context, UserMessage::new(Some(11), Payload::custom("later", body.clone()))).await;

        let start = tokio::time::Instant::now();
        while context.outbound().is_empty() {
            assert!(start.elapsed() < std::time::Duration::from_secs(1));
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let reply = next_reply(&context);
        assert_eq!(reply.handle, Some(11));
        assert_eq!(reply.payload, Payload::custom("later", body));
    }

    #[tokio::test]
    async fn test_panicking_completion_replies_empty() {
        let context = session();
        run(&context, UserMessage::new(Some(3), Payload::custom("boom", FieldMessage::new()))).await;

        let start = tokio::time::Instant::now();
        while context.outbound().is_empty() {
            assert!(start.elapsed() < std::time::Duration::from_secs(1));
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let reply = next_reply(&context);
        assert_eq!(reply.handle, Some(3));
        assert_eq!(reply.payload, Payload::Empty);

        // The session still serves later requests
        run(&context, UserMessage::new(Some(4), data(4))).await;
        assert_eq!(next_reply(&context).handle, Some(4));
    }

    #[tokio::test]
    async fn test_completions_are_tracked_until_joined() {
        let context = session();
        run(&context, UserMessage::new(Some(12), Payload::custom("later", FieldMessage::new()))).await;
        assert_eq!(context.pending_completions(), 1);

        let mut completions = context.take_completions();
        while completions.join_next().await.is_some() {}
        assert_eq!(next_reply(&context).handle, Some(12));
        assert_eq!(context.pending_completions(), 0);
    }
}
