//! Liveness watchdog.
//!
//! The reader records activity for every inbound envelope. The watchdog runs
//! on a fixed delay: after an initial grace period, then once per period.
//! A run that finds no activity since the previous run fires the timeout
//! action once and stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Activity flag checked by the watchdog task.
#[derive(Debug, Default)]
pub struct Watchdog {
    active: AtomicBool,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the peer as alive.
    pub fn record_activity(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Consume the activity flag, returning whether anything was recorded
    /// since the last check.
    pub fn check(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    /// Start the periodic check.
    ///
    /// `on_timeout` runs at most once, on the first silent period.
    pub fn spawn<F>(
        self: &Arc<Self>,
        grace: Duration,
        period: Duration,
        on_timeout: F,
    ) -> WatchdogHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let watchdog = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            loop {
                if !watchdog.check() {
                    warn!("No activity from peer within {:?}, poisoning session", period);
                    on_timeout();
                    return;
                }
                debug!("Watchdog check passed");
                tokio::time::sleep(period).await;
            }
        });
        WatchdogHandle { task }
    }
}

/// Handle to a running watchdog schedule. Dropping cancels it.
#[derive(Debug)]
pub struct WatchdogHandle {
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Stop the schedule. Safe to call after the watchdog has fired.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_action(fired: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_check_consumes_activity() {
        let watchdog = Watchdog::new();
        assert!(!watchdog.check());
        watchdog.record_activity();
        assert!(watchdog.check());
        assert!(!watchdog.check());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_grace_without_activity() {
        let watchdog = Arc::new(Watchdog::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let _handle = watchdog.spawn(
            Duration::from_millis(500),
            Duration::from_millis(100),
            counter_action(&fired),
        );

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_keeps_watchdog_quiet() {
        let watchdog = Arc::new(Watchdog::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = watchdog.spawn(
            Duration::from_millis(200),
            Duration::from_millis(100),
            counter_action(&fired),
        );

        for _ in 0..10 {
            watchdog.record_activity();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Go silent: the next check after the last activity was consumed fires
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let watchdog = Arc::new(Watchdog::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = watchdog.spawn(
            Duration::from_millis(100),
            Duration::from_millis(100),
            counter_action(&fired),
        );

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
