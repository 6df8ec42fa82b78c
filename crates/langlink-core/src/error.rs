//! Error types for the langlink session engine.
//!
//! Errors fall into four groups that the session treats differently:
//! transport faults (pipe open/read/write), protocol faults (malformed
//! envelopes), handler faults (application payload handling) and
//! configuration errors. Liveness faults are not errors; they poison the
//! session through the watchdog.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the session engine.
#[derive(Debug, Error)]
pub enum LinkError {
    // Transport errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // Protocol errors
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Envelope size {size} exceeds maximum {max}")]
    EnvelopeTooLarge { size: usize, max: usize },

    #[error("Missing required field {ordinal} in {message} message")]
    MissingField { message: &'static str, ordinal: u16 },

    // Handler errors
    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("No handler registered for payload kind {kind}")]
    Unrouted { kind: String },

    // Session lifecycle errors
    #[error("Dispatcher is shut down")]
    DispatcherClosed,

    #[error("Session is poisoned")]
    SessionPoisoned,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for session engine operations.
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LinkError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LinkError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        LinkError::Decode {
            message: message.into(),
        }
    }

    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        LinkError::Handler {
            message: message.into(),
        }
    }

    /// Whether this error means the peer went away.
    ///
    /// Read failures end the session as a normal disconnect rather than a crash.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::Io { .. })
    }

    /// Whether this error is a malformed-traffic fault on the wire.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            LinkError::Decode { .. }
                | LinkError::EnvelopeTooLarge { .. }
                | LinkError::MissingField { .. }
        )
    }
}
