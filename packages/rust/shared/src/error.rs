//! Error types for the nonprofit corpus pipeline.
//!
//! Library crates use [`CorpusError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to an API or a website.
    #[error("network error: {0}")]
    Network(String),

    /// The registry answered with a non-success status. Fatal to the harvest.
    #[error("registry request {url} failed with HTTP {status}")]
    Registry { url: String, status: u16 },

    /// JSON or HTML payload could not be interpreted.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// CSV table read/write error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Enrichment API lookup or response error.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad chunk settings, missing column, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CorpusError>;

impl CorpusError {
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
        let err = CorpusError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = CorpusError::Registry {
            url: "https://registry.example/search.json".into(),
            status: 503,
        };
        assert!(err.to_string().contains("HTTP 503"));
    }
}
