//! Centralized configuration for the session engine.
//!
//! `SessionConfig` holds the compiled-in defaults. `SessionSettings` is the
//! runtime view of the same values, loadable from a JSON file; any key
//! missing from the file falls back to its default.

use crate::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Compiled-in session defaults.
pub struct SessionConfig;

impl SessionConfig {
    // Advisory timeout for callers waiting synchronously on a reply
    pub const MESSAGE_TIMEOUT: Duration = Duration::from_millis(3000);

    // Watchdog cadence is twice this value
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(3000);

    // Bounds graceful shutdown and the initial watchdog grace period
    pub const TERMINATION_TIMEOUT: Duration = Duration::from_millis(30_000);

    // Pipe open retry window
    pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
    pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

    pub const DISPATCH_WORKERS: usize = 4;
    pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024; // 16MB
}

/// Runtime session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub message_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub termination_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub dispatch_workers: usize,
    pub max_envelope_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            message_timeout_ms: SessionConfig::MESSAGE_TIMEOUT.as_millis() as u64,
            heartbeat_timeout_ms: SessionConfig::HEARTBEAT_TIMEOUT.as_millis() as u64,
            termination_timeout_ms: SessionConfig::TERMINATION_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: SessionConfig::CONNECT_TIMEOUT.as_millis() as u64,
            dispatch_workers: SessionConfig::DISPATCH_WORKERS,
            max_envelope_size: SessionConfig::MAX_ENVELOPE_SIZE,
        }
    }
}

impl SessionSettings {
    /// Load settings from a JSON file and validate them.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| LinkError::io_with_path(e, path))?;
        let settings: SessionSettings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("message_timeout_ms", self.message_timeout_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("termination_timeout_ms", self.termination_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(LinkError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        if self.dispatch_workers == 0 {
            return Err(LinkError::Config {
                message: "dispatch_workers must be greater than zero".to_string(),
            });
        }
        if self.max_envelope_size < crate::wire::HEADER_LEN {
            return Err(LinkError::Config {
                message: format!(
                    "max_envelope_size {} is smaller than the envelope header",
                    self.max_envelope_size
                ),
            });
        }
        Ok(())
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = SessionSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.heartbeat_timeout(), SessionConfig::HEARTBEAT_TIMEOUT);
        assert!(settings.termination_timeout() > settings.heartbeat_timeout());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let settings: SessionSettings =
            serde_json::from_str(r#"{"heartbeat_timeout_ms": 50, "dispatch_workers": 2}"#)
                .unwrap();
        assert_eq!(settings.heartbeat_timeout_ms, 50);
        assert_eq!(settings.dispatch_workers, 2);
        assert_eq!(
            settings.termination_timeout(),
            SessionConfig::TERMINATION_TIMEOUT
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let settings = SessionSettings {
            dispatch_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(LinkError::Config { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let settings = SessionSettings {
            heartbeat_timeout_ms: 0,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_timeout_ms"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"termination_timeout_ms": 1234}}"#).unwrap();

        let settings = SessionSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.termination_timeout_ms, 1234);
        assert_eq!(settings.dispatch_workers, SessionConfig::DISPATCH_WORKERS);
    }

    #[test]
    fn test_from_missing_file_is_io_error() {
        let result = SessionSettings::from_json_file("/nonexistent/langlink.json");
        assert!(matches!(result, Err(LinkError::Io { .. })));
    }
}
