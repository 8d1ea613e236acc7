//! mlrelease-state: alias registry backends for mlrelease
//!
//! This crate provides the persistence layer for model release management.
//! It owns the model-version records, the named pointers that resolve to
//! them, and the compare-and-set primitive every alias mutation goes through.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: pointer exclusivity, atomic swaps, consistent reads.
//!
//! ## Key Components
//!
//! - `AliasRegistry`: versions + `candidate`/`prod`/`champion` pointers
//! - `EvaluationStore`: evaluation reports per version
//! - `MemoryAliasRegistry`: in-process backend
//! - `FsAliasRegistry`: single JSON file backend for operator tooling

mod error;
pub mod fs_registry;
pub mod memory;
mod state;
pub mod storage_traits;
pub mod tags;

pub use error::StorageError;
pub use fs_registry::FsAliasRegistry;
pub use memory::MemoryAliasRegistry;
pub use storage_traits::{
    Alias, AliasRegistry, AliasSnapshot, AliasSwap, EvaluationReport, EvaluationStore,
    ModelVersion, StorageResult, SwapOutcome, TagWrite, Tags, VersionId,
};
