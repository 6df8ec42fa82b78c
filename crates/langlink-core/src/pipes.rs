//! Opening the peer's named pipes.
//!
//! The peer creates the pipes and opens its own ends. Here we open the
//! opposite ends, retrying until the peer is ready or the connect timeout
//! passes. The input pipe is read from, the output pipe written to.
//!
//! - Unix: FIFOs, one per direction.
//! - Windows: named pipe servers created by the peer, one per direction.

use crate::Result;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Open both pipes concurrently.
///
/// The peer may open its ends in either order, so neither side is allowed
/// to wait for the other to finish first.
pub async fn open_pair(
    input: &Path,
    output: &Path,
    connect_timeout: Duration,
) -> Result<(PipeReader, PipeWriter)> {
    let (reader, writer) = tokio::join!(
        platform::open_reader(input, connect_timeout),
        platform::open_writer(output, connect_timeout),
    );
    let (reader, writer) = (reader?, writer?);
    tracing::debug!(
        "Connected pipes: input {}, output {}",
        input.display(),
        output.display()
    );
    Ok((reader, writer))
}

#[cfg(unix)]
mod platform {
    use super::{PipeReader, PipeWriter};
    use crate::config::SessionConfig;
    use crate::{LinkError, Result};
    use nix::errno::Errno;
    use std::path::Path;
    use std::time::Duration;
    use tokio::net::unix::pipe;
    use tokio::time::Instant;
    use tracing::debug;

    /// Open the FIFO for reading once the peer has opened it for writing.
    ///
    /// A blocking open is the only way to wait for a writer without
    /// reading, so it runs on the blocking pool. On timeout the blocked open
    /// is released by briefly opening the write end ourselves.
    pub(super) async fn open_reader(path: &Path, timeout: Duration) -> Result<PipeReader> {
        let owned = path.to_path_buf();
        let mut opening = tokio::task::spawn_blocking(move || std::fs::File::open(owned));

        match tokio::time::timeout(timeout, &mut opening).await {
            Ok(joined) => {
                let file = joined
                    .map_err(|e| LinkError::Other(format!("Pipe open task failed: {}", e)))?
                    .map_err(|e| LinkError::io_with_path(e, path))?;
                let receiver =
                    pipe::Receiver::from_file(file).map_err(|e| LinkError::io_with_path(e, path))?;
                Ok(Box::new(receiver))
            }
            Err(_) => {
                if let Err(e) = pipe::OpenOptions::new().open_sender(path) {
                    debug!("Could not release pending open of {}: {}", path.display(), e);
                }
                let _ = opening.await;
                Err(LinkError::Timeout(timeout))
            }
        }
    }

    /// Open the FIFO for writing, retrying while the peer has no reader on it.
    pub(super) async fn open_writer(path: &Path, timeout: Duration) -> Result<PipeWriter> {
        let deadline = Instant::now() + timeout;
        loop {
            match pipe::OpenOptions::new().open_sender(path) {
                Ok(sender) => return Ok(Box::new(sender)),
                Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                    if Instant::now() >= deadline {
                        return Err(LinkError::Timeout(timeout));
                    }
                    tokio::time::sleep(SessionConfig::CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(LinkError::io_with_path(e, path)),
            }
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::{PipeReader, PipeWriter};
    use crate::config::SessionConfig;
    use crate::{LinkError, Result};
    use std::path::Path;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};
    use tokio::time::Instant;

    const ERROR_PIPE_BUSY: i32 = 231;

    pub(super) async fn open_reader(path: &Path, timeout: Duration) -> Result<PipeReader> {
        Ok(Box::new(open_client(path, timeout).await?))
    }

    pub(super) async fn open_writer(path: &Path, timeout: Duration) -> Result<PipeWriter> {
        Ok(Box::new(open_client(path, timeout).await?))
    }

    /// Connect to the peer's pipe server, retrying while it is missing or busy.
    async fn open_client(path: &Path, timeout: Duration) -> Result<NamedPipeClient> {
        let deadline = Instant::now() + timeout;
        loop {
            match ClientOptions::new().open(path) {
                Ok(client) => return Ok(client),
                Err(e)
                    if e.raw_os_error() == Some(ERROR_PIPE_BUSY)
                        || e.kind() == std::io::ErrorKind::NotFound =>
                {
                    if Instant::now() >= deadline {
                        return Err(LinkError::Timeout(timeout));
                    }
                    tokio::time::sleep(SessionConfig::CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(LinkError::io_with_path(e, path)),
            }
        }
    }
}
