//! Outbound envelope queue.
//!
//! Many producers (reader, dispatcher workers, async completions) push;
//! the writer is the single consumer. Envelopes leave in push order.

use crate::wire::Envelope;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Ordered multi-producer queue of envelopes awaiting transmission.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<Envelope>>,
    available: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope and wake the consumer.
    pub fn push(&self, envelope: Envelope) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(envelope);
        self.available.notify_one();
    }

    /// Append the "no more output" sentinel.
    pub fn push_sentinel(&self) {
        self.push(Envelope::sentinel());
    }

    /// Take the oldest envelope without waiting.
    pub fn try_pop(&self) -> Option<Envelope> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Wait for and take the oldest envelope.
    pub async fn pop(&self) -> Envelope {
        loop {
            if let Some(envelope) = self.try_pop() {
                return envelope;
            }
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
