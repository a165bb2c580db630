//! Error types for the validation and scoring engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while validating, scoring or persisting a session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Writing a patch's content to disk failed.
    #[error("Failed to apply patch to {path}: {source}")]
    Apply {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Restoring a file's pre-patch snapshot failed.
    #[error("Failed to restore {path}: {source}")]
    Revert {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A patch targets a path outside the repository.
    #[error("Refusing to write {path}: {message}")]
    InvalidPath { path: PathBuf, message: String },

    /// The test backend could not produce any result.
    #[error("Test backend {backend} produced no result: {message}")]
    Backend { backend: String, message: String },

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Results could not be written.
    #[error("Failed to persist results to {path}: {message}")]
    Persist { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn persist(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Persist {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error means no further suite runs are possible this session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, EngineError::Backend { .. })
    }
}
