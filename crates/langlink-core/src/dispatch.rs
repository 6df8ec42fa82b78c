//! Per-session dispatch pool.
//!
//! A fixed set of worker tasks pulls jobs from one FIFO channel, so jobs
//! *start* in submission order while up to `workers` of them run at once.
//! `shutdown()` stops intake; workers finish whatever is already queued and
//! exit, which `join()` waits for.

use crate::{LinkError, Result};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A unit of dispatch work.
pub type DispatchJob = BoxFuture<'static, ()>;

/// Bounded worker pool for user-message handling.
pub struct Dispatcher {
    sender: Mutex<Option<mpsc::UnboundedSender<DispatchJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Spawn a pool of `workers` tasks on the current runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<DispatchJob>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers)
            .map(|index| {
                let receiver = receiver.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        in_flight.fetch_add(1, Ordering::SeqCst);
                        job.await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                    debug!("Dispatch worker {} exited", index);
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            worker_count: workers,
            in_flight,
        }
    }

    /// Queue a job. Fails once the pool has been shut down.
    pub fn submit(&self, job: DispatchJob) -> Result<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| LinkError::DispatcherClosed),
            None => Err(LinkError::DispatcherClosed),
        }
    }

    /// Stop accepting work. Already queued jobs still run.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Wait for every worker to exit. Only meaningful after `shutdown()`.
    pub async fn join(&self) {
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("worker_count", &self.worker_count)
            .field("in_flight", &self.in_flight())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
