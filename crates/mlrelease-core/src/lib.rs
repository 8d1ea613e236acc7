//! mlrelease Core Library
//!
//! Release policy and alias routing for registered ML model versions:
//! lineage validation, the evaluation gate, promotion with atomic alias
//! swaps, one-step rollback, and per-request routing across the `prod` and
//! `candidate` aliases (including canary splits and shadow traffic).

pub mod domain;
pub mod gate;
pub mod metadata;
pub mod metrics;
pub mod obs;
pub mod promotion;
pub mod registration;
pub mod rollback;
pub mod router;
pub mod settings;
pub mod telemetry;

pub use domain::{
    Alias, AliasSnapshot, DecisionReport, EvaluationReport, ModelVersion, ReleaseError, Result,
    Tags, VersionId, ViolationKind,
};

pub use gate::{
    GateEvaluator, GateVerdict, MetricRule, MetricRuleSet, PredicatePolicy, ThresholdPolicy,
};
pub use metadata::missing_required_tags;
pub use promotion::{PromotionConfig, PromotionDecisionEngine};
pub use registration::Registrar;
pub use rollback::{RollbackManager, RollbackOutcome};
pub use router::{
    FnBackend, InferenceBackend, InferenceError, InferenceRequest, Prediction, Readiness,
    RequestRouter, ResolvedAlias, RouteError, RoutedResponse, RoutingDecision, ServingMode,
    ShadowHandle, ShadowOutcome,
};
pub use settings::{BucketSeed, CanaryPct, ConfigError, ServingSettings};

pub use mlrelease_state::{
    AliasRegistry, EvaluationStore, FsAliasRegistry, MemoryAliasRegistry, StorageError,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
