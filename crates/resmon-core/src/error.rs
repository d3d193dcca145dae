//! Error types for metric providers, sinks and configuration.
//!
//! Provider and sink errors never leave the daemon loop: they are logged at
//! debug level and the affected fold or scalar is dropped. Only
//! [`ConfigError`] reaches a caller, at construction time.

use std::path::PathBuf;

/// Failure of a raw metric provider (host counters or accelerator query).
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("{what} is not available on this platform")]
    Unsupported { what: &'static str },

    #[error("command `{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("command `{command}` did not finish within {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
}

impl ProbeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            what,
            detail: detail.into(),
        }
    }
}

/// Failure to deliver one scalar to the metrics sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("scalar encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink rejected {series}@{iteration}: {reason}")]
    Rejected {
        series: String,
        iteration: i64,
        reason: String,
    },
}

/// Invalid or unreadable monitor configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a finite value greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be a finite value >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} = {value} gives an interval too long to wait on")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
