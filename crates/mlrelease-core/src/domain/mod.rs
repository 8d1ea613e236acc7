//! Domain models for release management.
//!
//! - `DecisionReport`: structured promotion verdict
//! - `ReleaseError`: failures of promotion and rollback operations
//!
//! Model versions, aliases and evaluation reports live in `mlrelease-state`
//! and are re-exported here for convenience.

pub mod decision;
pub mod error;

pub use decision::{DecisionReport, ViolationKind};
pub use error::{ReleaseError, Result};

pub use mlrelease_state::{
    Alias, AliasSnapshot, EvaluationReport, ModelVersion, Tags, VersionId,
};
