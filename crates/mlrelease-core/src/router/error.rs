//! Errors surfaced to serving clients.

use mlrelease_state::{Alias, StorageError};

/// Failure reported by an [`InferenceBackend`](super::InferenceBackend).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("model {version} could not be loaded: {reason}")]
    Load { version: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    Failed(String),
}

/// Why a request could not be served.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("unknown serving mode '{0}' (expected prod, candidate, canary or shadow)")]
    UnknownMode(String),

    /// The alias the mode needs has never been set. Expected for `candidate`.
    #[error("alias {0} is not set")]
    AliasAbsent(Alias),

    /// The registry failed while resolving an alias.
    #[error("registry unavailable while resolving {alias}: {source}")]
    RegistryUnavailable {
        alias: Alias,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl RouteError {
    /// Client-visible HTTP status.
    pub fn status_code(&self) -> u16 {
        match self {
            RouteError::UnknownMode(_) => 400,
            RouteError::AliasAbsent(_) | RouteError::RegistryUnavailable { .. } => 503,
            RouteError::Inference(_) => 500,
        }
    }

    /// Whether the failure is the expected "nothing to serve yet" case rather
    /// than an unhealthy dependency.
    pub fn is_alias_absent(&self) -> bool {
        matches!(self, RouteError::AliasAbsent(_))
    }
}
