//! Domain-level error taxonomy for release operations.

use mlrelease_state::{Alias, StorageError, VersionId};

/// Errors from promotion and rollback operations.
///
/// Policy violations are never raised through this type; they are collected
/// into a [`DecisionReport`](crate::domain::DecisionReport).
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("no rollback target: prod version {current} has no previous_prod_version tag")]
    NoRollbackTarget { current: VersionId },

    #[error("alias {0} is not set")]
    AliasUnresolved(Alias),

    #[error("{operation} conflict: alias {alias} kept moving after {attempts} attempts")]
    Conflict {
        operation: &'static str,
        alias: Alias,
        attempts: u32,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for release operations.
pub type Result<T> = std::result::Result<T, ReleaseError>;
