//! Storage trait definitions for mlrelease
//!
//! These traits define the core storage abstractions:
//! - `AliasRegistry`: model versions plus the named pointers
//!   (`candidate`, `prod`, `champion`) that resolve to them
//! - `EvaluationStore`: evaluation reports attached to model versions
//!
//! All traits are async and backend-agnostic. An in-memory registry is
//! provided by the `memory` module and a JSON-file registry by `fs_registry`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Tag mapping carried by a model version.
pub type Tags = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a registered model version (e.g. `"3"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        VersionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VersionId {
    fn from(s: &str) -> Self {
        VersionId(s.to_string())
    }
}

/// Named pointer to a model version.
///
/// `Champion` is a synonym for `Prod`: both resolve through the same pointer
/// slot, so the pair can never diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alias {
    Candidate,
    Prod,
    Champion,
}

impl Alias {
    pub const ALL: [Alias; 3] = [Alias::Candidate, Alias::Prod, Alias::Champion];

    pub fn as_str(&self) -> &'static str {
        match self {
            Alias::Candidate => "candidate",
            Alias::Prod => "prod",
            Alias::Champion => "champion",
        }
    }

    /// The pointer slot this alias reads and writes.
    pub fn slot(&self) -> Alias {
        match self {
            Alias::Champion => Alias::Prod,
            other => *other,
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Alias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "candidate" => Ok(Alias::Candidate),
            "prod" => Ok(Alias::Prod),
            "champion" => Ok(Alias::Champion),
            other => Err(format!("unknown alias: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A registered model version.
///
/// Identity (`model_name`, `version`) is fixed at registration. Tags may be
/// added or overwritten afterwards, but only through an [`AliasSwap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_name: String,
    pub version: VersionId,
    /// Training run that produced the artifact.
    pub source_run_id: Option<String>,
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
}

impl ModelVersion {
    pub fn new(model_name: impl Into<String>, version: impl Into<VersionId>) -> Self {
        Self {
            model_name: model_name.into(),
            version: version.into(),
            source_run_id: None,
            tags: Tags::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_source_run(mut self, run_id: impl Into<String>) -> Self {
        self.source_run_id = Some(run_id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Trimmed tag value, treating blank values as absent.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

impl From<String> for VersionId {
    fn from(s: String) -> Self {
        VersionId(s)
    }
}

/// Metrics for one model version plus the evaluator's own gate verdict.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metrics: BTreeMap<String, f64>,
    pub gate_passed: bool,
}

impl EvaluationReport {
    pub fn new(gate_passed: bool) -> Self {
        Self {
            metrics: BTreeMap::new(),
            gate_passed,
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Point-in-time view of every alias for one model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AliasSnapshot {
    pub model_name: String,
    pub candidate: Option<VersionId>,
    pub prod: Option<VersionId>,
    pub champion: Option<VersionId>,
    /// Incremented by every applied swap.
    pub revision: u64,
}

impl AliasSnapshot {
    pub fn get(&self, alias: Alias) -> Option<&VersionId> {
        match alias {
            Alias::Candidate => self.candidate.as_ref(),
            Alias::Prod => self.prod.as_ref(),
            Alias::Champion => self.champion.as_ref(),
        }
    }
}

/// A tag write applied as part of an [`AliasSwap`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagWrite {
    pub version: VersionId,
    pub key: String,
    pub value: String,
}

impl TagWrite {
    pub fn new(version: &VersionId, key: &str, value: impl Into<String>) -> Self {
        Self {
            version: version.clone(),
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Compare-and-set request for one alias.
///
/// Applied only if the alias currently resolves to `expected` (`None` meaning
/// unset). Tag writes land in the same critical section as the pointer move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasSwap {
    pub alias: Alias,
    pub expected: Option<VersionId>,
    pub target: VersionId,
    pub tag_writes: Vec<TagWrite>,
}

impl AliasSwap {
    pub fn new(alias: Alias, expected: Option<VersionId>, target: VersionId) -> Self {
        Self {
            alias,
            expected,
            target,
            tag_writes: Vec::new(),
        }
    }

    pub fn with_tag(mut self, write: TagWrite) -> Self {
        self.tag_writes.push(write);
        self
    }
}

/// Result of a compare-and-set attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SwapOutcome {
    /// The pointer moved; `previous` is what it resolved to before.
    Applied {
        previous: Option<VersionId>,
        revision: u64,
    },
    /// The alias no longer matched `expected`; nothing was written.
    Conflict {
        expected: Option<VersionId>,
        actual: Option<VersionId>,
    },
}

impl SwapOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SwapOutcome::Applied { .. })
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Alias registry: an arena of model versions plus named pointer indices.
///
/// Guarantees:
/// - Every alias resolves to at most one version at any instant.
/// - `champion` always resolves to the same version as `prod`.
/// - `compare_and_swap` is atomic: pointer move and tag writes happen
///   together or not at all.
#[async_trait]
pub trait AliasRegistry: Send + Sync {
    /// Register a new model version. Fails if the identifier is taken.
    async fn register_version(&self, version: ModelVersion) -> StorageResult<()>;

    /// Fetch a registered version. Returns `StorageError::VersionNotFound` if absent.
    async fn get_version(&self, model: &str, version: &VersionId) -> StorageResult<ModelVersion>;

    /// All versions registered for a model, ordered by identifier.
    async fn list_versions(&self, model: &str) -> StorageResult<Vec<ModelVersion>>;

    /// Resolve one alias. `Ok(None)` means the alias has never been set.
    async fn resolve(&self, model: &str, alias: Alias) -> StorageResult<Option<VersionId>>;

    /// Read every alias at once, consistently.
    async fn snapshot(&self, model: &str) -> StorageResult<AliasSnapshot>;

    /// Move an alias if it still points at `swap.expected`.
    async fn compare_and_swap(&self, model: &str, swap: AliasSwap) -> StorageResult<SwapOutcome>;
}

/// Evaluation reports keyed by model version.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Attach (or replace) the report for a version.
    async fn put_report(
        &self,
        model: &str,
        version: &VersionId,
        report: EvaluationReport,
    ) -> StorageResult<()>;

    /// Fetch the report for a version, if one was recorded.
    async fn get_report(
        &self,
        model: &str,
        version: &VersionId,
    ) -> StorageResult<Option<EvaluationReport>>;
}
