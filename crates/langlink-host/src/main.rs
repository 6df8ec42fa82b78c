//! Langlink Host - serves one session over a named pipe pair.
//!
//! The managed process creates the pipes and passes their paths. This
//! binary opens the opposite ends, serves the session until the peer goes
//! away, asks to stop, or falls silent, and then exits.

mod handlers;

use anyhow::{Context, Result};
use clap::Parser;
use langlink_core::{Session, SessionSettings};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "langlink-host")]
#[command(about = "Serve one langlink session over a named pipe pair")]
struct Args {
    /// Pipe the peer writes to (read by this host)
    #[arg(long)]
    input: PathBuf,

    /// Pipe the peer reads from (written by this host)
    #[arg(long)]
    output: PathBuf,

    /// JSON settings file; missing keys use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Heartbeat timeout override in milliseconds
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// Dispatch worker count override
    #[arg(long)]
    workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Settings file first, then command-line overrides.
fn load_settings(args: &Args) -> Result<SessionSettings> {
    let mut settings = match &args.config {
        Some(path) => SessionSettings::from_json_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => SessionSettings::default(),
    };
    if let Some(heartbeat_ms) = args.heartbeat_ms {
        settings.heartbeat_timeout_ms = heartbeat_ms;
    }
    if let Some(workers) = args.workers {
        settings.dispatch_workers = workers;
    }
    settings.validate()?;
    Ok(settings)
}

/// Filter from `RUST_LOG` when set, else the level picked by `--debug`.
fn log_filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug
    FmtSubscriber::builder()
        .with_env_filter(log_filter(args.debug))
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting langlink host");

    let settings = load_settings(&args)?;
    let context = handlers::build_context(settings)?;
    let session = Session::connect(context, &args.input, &args.output)
        .await
        .with_context(|| {
            format!(
                "connecting to {} and {}",
                args.input.display(),
                args.output.display()
            )
        })?;
    let handle = session.context();
    info!("Connected, session {}", handle.id());

    let run = session.run();
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, poisoning session");
            handle.poison();
            run.await
        }
    };

    result?;
    info!("Session finished, exiting");
    Ok(())
}
