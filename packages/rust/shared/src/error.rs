//! Error types for Nexus.
//!
//! Library crates use [`NexusError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Nexus operations.
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to a remote API.
    #[error("network error: {0}")]
    Network(String),

    /// A remote API answered with a non-success status.
    #[error("api error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Malformed payload (model output, sitemap XML, artifact JSON).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Pre-flight validation failure; the workflow never starts.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A step's required input artifact is absent or unusable.
    #[error("missing input: {artifact} ({reason})")]
    MissingInput { artifact: String, reason: String },

    /// A named artifact or project does not exist.
    #[error("not found: {name}")]
    NotFound { name: String },

    /// Unexpected failure inside a step body; aborts the run.
    #[error("step {step} failed: {message}")]
    Step { step: u8, message: String },

    /// A pooled worker task panicked or was aborted.
    #[error("worker failed: {0}")]
    Worker(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NexusError>;

impl NexusError {
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

    /// Missing or unusable predecessor artifact.
    pub fn missing_input(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingInput {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a work unit failing with this error is worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Api { .. } | Self::Parse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NexusError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = NexusError::missing_input("products.txt", "file not found");
        assert_eq!(
            err.to_string(),
            "missing input: products.txt (file not found)"
        );

        let err = NexusError::Api {
            status: 429,
            message: "rate limited".into(),
        };
        assert!(err.to_string().contains("HTTP 429"));
    }

    #[test]
    fn transient_classification() {
        assert!(NexusError::Network("timeout".into()).is_transient());
        assert!(NexusError::parse("bad json").is_transient());
        assert!(!NexusError::validation("no steps").is_transient());
        assert!(!NexusError::not_found("x").is_transient());
        assert!(!NexusError::Worker("panicked".into()).is_transient());
    }
}
