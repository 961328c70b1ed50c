//! Error types for Armory.
//!
//! Library crates use [`ArmoryError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all Armory operations.
#[derive(Debug, thiserror::Error)]
pub enum ArmoryError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed scrape submission (empty country, unknown category, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The country record could not be resolved before any category ran.
    #[error("setup error: {0}")]
    Setup(String),

    /// Network/HTTP error while scraping or during a lookup.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// An external call did not finish within its deadline.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The job queue is full; the submission was not accepted.
    #[error("pipeline queue is full ({capacity} pending tasks), try again later")]
    Busy { capacity: usize },

    /// Unknown task or resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource with the same identity already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The task was cancelled while the operation was in flight.
    #[error("cancelled")]
    Cancelled,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ArmoryError>;

impl ArmoryError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Setup(_) => "SETUP_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Busy { .. } => "BUSY",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Cancelled => "CANCELLED",
            Self::Io { .. } => "IO_ERROR",
        }
    }
}
