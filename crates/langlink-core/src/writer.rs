//! Writer loop: drains the outbound queue onto the output pipe.

use crate::poison::PoisonToken;
use crate::queue::OutboundQueue;
use crate::wire::write_envelope;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Write queued envelopes in order until the sentinel is dequeued.
///
/// The sentinel is never written. It goes back on the queue so any other
/// consumer also stops. Write failures are logged and skipped; the reader
/// decides when the connection is dead.
///
/// A write still blocked when `poison` fires is abandoned and the output is
/// dropped without a graceful close, so a peer that stopped reading cannot
/// hold the session open. Writes that can complete still go out after
/// poisoning, up to the sentinel.
pub async fn run_writer<W>(mut output: W, queue: Arc<OutboundQueue>, poison: PoisonToken)
where
    W: AsyncWrite + Unpin,
{
    let mut written: u64 = 0;
    loop {
        let envelope = queue.pop().await;
        if envelope.is_sentinel() {
            queue.push(envelope);
            break;
        }
        tokio::select! {
            biased;
            result = write_envelope(&mut output, &envelope) => match result {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to write {} envelope: {}", envelope.directive, e),
            },
            _ = poison.poisoned() => {
                warn!(
                    "Output blocked after poison, dropping pipe with {} envelopes unsent",
                    queue.len() + 1
                );
                return;
            }
        }
    }
    debug!("Writer stopped after {} envelopes", written);

    if let Err(e) = output.shutdown().await {
        debug!("Output pipe close failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{
        read_envelope, ControlMessage, ControlOperation, Envelope, FieldMessage, Payload,
        UserMessage,
    };
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    #[tokio::test]
    async fn test_writer_stops_at_sentinel_and_requeues_it() {
        let queue = Arc::new(OutboundQueue::new());
        let first = Envelope::user(&UserMessage::new(Some(1), Payload::Empty));
        let after = Envelope::user(&UserMessage::new(Some(2), Payload::Empty));
        queue.push(first.clone());
        queue.push_sentinel();
        queue.push(after.clone());

        let mut out = Vec::new();
        run_writer(&mut out, queue.clone(), PoisonToken::new()).await;

        let mut cursor = std::io::Cursor::new(out);
        assert_eq!(read_envelope(&mut cursor, 1024).await.unwrap(), Some(first));
        assert_eq!(read_envelope(&mut cursor, 1024).await.unwrap(), None);

        // Remaining queue: the unsent envelope, then the sentinel again
        assert_eq!(queue.try_pop(), Some(after));
        assert!(queue.try_pop().unwrap().is_sentinel());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_second_consumer_also_observes_sentinel() {
        let queue = Arc::new(OutboundQueue::new());
        queue.push_sentinel();

        run_writer(Vec::new(), queue.clone(), PoisonToken::new()).await;
        tokio::time::timeout(Duration::from_secs(1), run_writer(Vec::new(), queue.clone(), PoisonToken::new()))
            .await
            .expect("second writer should stop on the requeued sentinel");
        assert_eq!(queue.len(), 1);
    }

    /// Output that fails every write.
    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_failures_do_not_stop_writer() {
        let queue = Arc::new(OutboundQueue::new());
        queue.push(Envelope::control(&ControlMessage::new(
            ControlOperation::Heartbeat,
        )));
        queue.push(Envelope::user(&UserMessage::new(
            None,
            Payload::Data(FieldMessage::new()),
        )));
        queue.push_sentinel();

        tokio::time::timeout(Duration::from_secs(1), run_writer(BrokenPipe, queue.clone(), PoisonToken::new()))
            .await
            .expect("writer should reach the sentinel despite failures");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_poison_abandons_blocked_write() {
        // Nobody reads the far end, so the first large write blocks
        let (output, _unread) = tokio::io::duplex(64);
        let queue = Arc::new(OutboundQueue::new());
        let poison = PoisonToken::new();
        let body = FieldMessage::new().with(1, crate::wire::FieldValue::Bytes(vec![7u8; 4096].into()));
        queue.push(Envelope::user(&UserMessage::new(Some(1), Payload::Data(body))));

        let writer = tokio::spawn(run_writer(output, queue.clone(), poison.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        poison.poison();
        queue.push_sentinel();
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("blocked writer should stop once poisoned")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unblocked_writes_still_flush_after_poison() {
        let queue = Arc::new(OutboundQueue::new());
        let poison = PoisonToken::new();
        let reply = Envelope::user(&UserMessage::new(Some(5), Payload::Empty));
        queue.push(reply.clone());
        poison.poison();
        queue.push_sentinel();

        let mut out = Vec::new();
        run_writer(&mut out, queue.clone(), poison).await;

        let mut cursor = std::io::Cursor::new(out);
        assert_eq!(read_envelope(&mut cursor, 1024).await.unwrap(), Some(reply));
    }
}
