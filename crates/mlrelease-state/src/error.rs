//! Error types for mlrelease-state

use thiserror::Error;

/// Errors produced by alias registry and evaluation store backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The requested model version was never registered.
    #[error("model version not found: {model}@{version}")]
    VersionNotFound { model: String, version: String },

    /// A version with this identifier is already registered.
    #[error("model version already registered: {model}@{version}")]
    VersionExists { model: String, version: String },

    /// The model version record is malformed.
    #[error("invalid model version: {0}")]
    InvalidVersion(String),

    /// The backend could not be reached or refused the operation.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// Persisted registry state could not be decoded.
    #[error("corrupt registry state at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the error means the backend itself is unhealthy, as opposed to
    /// a well-formed "not found" answer.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::Corrupt { .. } | StorageError::Io(_)
        )
    }
}
