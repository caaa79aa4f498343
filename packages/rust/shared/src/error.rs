//! Error types for khub.
//!
//! Library crates use [`KhubError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all khub operations.
#[derive(Debug, thiserror::Error)]
pub enum KhubError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a source API.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed response or record shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Staging store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown step, invalid invocation, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// External process (store host, stage command) error.
    #[error("process error: {0}")]
    Process(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KhubError>;

impl KhubError {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KhubError::config("missing confluence endpoint");
        assert_eq!(err.to_string(), "config error: missing confluence endpoint");

        let err = KhubError::validation("unknown pipeline step \"XX\"");
        assert!(err.to_string().contains("\"XX\""));

        let err = KhubError::io("/tmp/missing", std::io::Error::other("boom"));
        assert!(err.to_string().contains("/tmp/missing"));
    }
}
