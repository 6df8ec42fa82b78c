//! Session poison signal.
//!
//! A `PoisonToken` is the single shutdown signal of a session. It can be
//! cloned and shared across tasks; the first `poison()` on any clone wins
//! and every clone observes it. Tasks blocked in I/O select on
//! [`PoisonToken::poisoned`] so that poisoning drops their pipe handles.
//!
//! # Example
//!
//! ```
//! use langlink_core::poison::PoisonToken;
//!
//! let token = PoisonToken::new();
//! let token_clone = token.clone();
//!
//! assert!(token_clone.poison());
//! assert!(!token.poison()); // already poisoned
//! assert!(token.is_poisoned());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    poisoned: AtomicBool,
    notify: Notify,
}

/// Idempotent shutdown signal shared by a session's tasks.
#[derive(Debug, Clone, Default)]
pub struct PoisonToken {
    inner: Arc<Inner>,
}

impl PoisonToken {
    /// Create a new, unpoisoned token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Poison the token and wake every waiter.
    ///
    /// Returns `true` only for the call that actually flipped the state.
    pub fn poison(&self) -> bool {
        let first = !self.inner.poisoned.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Check if the token has been poisoned.
    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::SeqCst)
    }

    /// Wait until the token is poisoned.
    pub async fn poisoned(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_poisoned() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_token_not_poisoned() {
        let token = PoisonToken::new();
        assert!(!token.is_poisoned());
    }

    #[test]
    fn test_poison_only_first_call_wins() {
        let token = PoisonToken::new();
        assert!(token.poison());
        assert!(!token.poison());
        assert!(token.is_poisoned());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = PoisonToken::new();
        let token2 = token1.clone();

        token2.poison();

        assert!(token1.is_poisoned());
        assert!(token2.is_poisoned());
    }

    #[tokio::test]
    async fn test_poisoned_wakes_waiter() {
        let token = PoisonToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.poisoned().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.poison();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_poisoned_returns_immediately_when_already_poisoned() {
        let token = PoisonToken::new();
        token.poison();
        tokio::time::timeout(Duration::from_millis(100), token.poisoned())
            .await
            .expect("already poisoned");
    }

    #[tokio::test]
    async fn test_concurrent_poison_has_single_winner() {
        let token = PoisonToken::new();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let token = token.clone();
            tasks.push(tokio::spawn(async move { token.poison() }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
