//! Session lifecycle.
//!
//! A [`Session`] owns one connected pipe pair. [`Session::run`] drives it
//! from serving to closed:
//!
//! 1. start the writer, the watchdog and the dispatch pool
//! 2. read until EOF, read failure, peer poison or watchdog timeout
//! 3. poison, then drain the pool, handler completions and the writer within
//!    the termination timeout
//! 4. tear down the session state

mod context;
mod init;
mod reader;
mod route;

pub use context::SessionContext;

use crate::context::ClientContext;
use crate::dispatch::Dispatcher;
use crate::handler::SessionState;
use crate::pipes;
use crate::writer::run_writer;
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Where a session is in its lifecycle. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionPhase {
    Connecting,
    Serving,
    Poisoning,
    Draining,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Connecting => "connecting",
            SessionPhase::Serving => "serving",
            SessionPhase::Poisoning => "poisoning",
            SessionPhase::Draining => "draining",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected session, ready to run.
pub struct Session<S: SessionState> {
    context: Arc<SessionContext<S>>,
    input: BoxedReader,
    output: BoxedWriter,
}

impl<S: SessionState> Session<S> {
    /// Wrap an already connected stream pair.
    pub fn new<R, W>(client: Arc<ClientContext<S>>, input: R, output: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            context: Arc::new(SessionContext::new(client)),
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    /// Open the named pipes created by the peer.
    ///
    /// `input` is read from and `output` written to. Fails with a timeout if
    /// the peer has not opened its ends within the connect timeout.
    pub async fn connect(
        client: Arc<ClientContext<S>>,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<Self> {
        let connect_timeout = client.settings().connect_timeout();
        let (reader, writer) =
            pipes::open_pair(input.as_ref(), output.as_ref(), connect_timeout).await?;
        Ok(Self {
            context: Arc::new(SessionContext::new(client)),
            input: reader,
            output: writer,
        })
    }

    /// Handle for poisoning, observing or sending on the session while it runs.
    pub fn context(&self) -> Arc<SessionContext<S>> {
        self.context.clone()
    }

    /// Serve until the session ends, then drain and close.
    ///
    /// Returns an error only for protocol faults; disconnects, peer poison
    /// and watchdog timeouts are normal endings. The session reaches
    /// [`SessionPhase::Closed`] either way.
    pub async fn run(self) -> Result<()> {
        let span = info_span!("session", id = %self.context.id());
        self.serve().instrument(span).await
    }

    async fn serve(self) -> Result<()> {
        let Session {
            context,
            input,
            output,
        } = self;
        let client = context.client().clone();

        let dispatcher = Arc::new(client.new_pool());
        let writer = tokio::spawn(
            run_writer(
                output,
                context.outbound().clone(),
                context.poison_token().clone(),
            )
            .in_current_span(),
        );
        let watchdog = {
            let target = context.clone();
            context.watchdog().spawn(
                client.termination_timeout(),
                client.heartbeat_timeout() * 2,
                move || target.poison(),
            )
        };
        context.set_phase(SessionPhase::Serving);
        info!(
            "Session serving with {} dispatch workers",
            dispatcher.worker_count()
        );

        let outcome = reader::run(input, &context, &dispatcher).await;
        if let Err(e) = &outcome {
            error!("Session ended on protocol fault: {}", e);
        }

        context.poison();
        watchdog.cancel();
        drain(&context, &dispatcher, writer).await;

        if let Some(state) = context.state() {
            client.state_factory().teardown(state).await;
        }
        context.set_phase(SessionPhase::Closed);
        info!("Session closed");
        outcome
    }
}

/// Wait for the initializer, the dispatch pool, pending handler completions
/// and the writer to finish. Anything still running after the termination
/// timeout is abandoned.
async fn drain<S: SessionState>(
    context: &Arc<SessionContext<S>>,
    dispatcher: &Arc<Dispatcher>,
    writer: JoinHandle<()>,
) {
    context.set_phase(SessionPhase::Draining);
    dispatcher.shutdown();

    let termination = context.client().termination_timeout();
    let writer_abort = writer.abort_handle();
    let init_task = context.take_init_task();
    let init_abort = init_task.as_ref().map(JoinHandle::abort_handle);
    let mut completions = JoinSet::new();

    let drained = tokio::time::timeout(termination, async {
        if let Some(task) = init_task {
            if let Err(e) = task.await {
                error!("Session initializer did not complete: {}", e);
            }
        }
        dispatcher.join().await;
        // Workers are gone, so no completion can be added after this
        completions = context.take_completions();
        while let Some(joined) = completions.join_next().await {
            if let Err(e) = joined {
                error!("Handler completion failed: {}", e);
            }
        }
        if let Err(e) = writer.await {
            error!("Writer task failed: {}", e);
        }
    })
    .await;

    match drained {
        Ok(()) => debug!("Session drained"),
        Err(_) => {
            warn!(
                "Session did not drain within {:?} (writer finished: {}, workers: {}, \
                 handlers in flight: {}, pending completions: {}, queued envelopes: {})",
                termination,
                writer_abort.is_finished(),
                dispatcher.worker_count(),
                dispatcher.in_flight(),
                completions.len() + context.pending_completions(),
                context.pending_outbound(),
            );
            writer_abort.abort();
            if let Some(abort) = init_abort {
                abort.abort();
            }
            completions.abort_all();
            context.take_completions().abort_all();
        }
    }
}
