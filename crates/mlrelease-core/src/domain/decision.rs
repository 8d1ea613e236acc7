//! Promotion decision report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a blocking error in a [`DecisionReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The alias being promoted from does not resolve.
    MissingAlias,
    /// Required lineage tags are absent.
    MetadataMissing,
    /// Evaluation gate did not pass.
    GateFailed,
    /// The version's `release_status` does not make it eligible.
    InvalidReleaseStatus,
    /// The version is already prod.
    NoopPromotion,
    /// Validation passed but the alias swap lost every race.
    PromotionConflict,
    /// The registry could not be read or written.
    Registry,
}

/// Outcome of a promotion policy evaluation.
///
/// Serialises to the stable shape
/// `{"allowed": bool, "context": {...}, "errors": [...], "warnings": [...]}`.
/// `allowed` is true exactly when `errors` is empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionReport {
    pub allowed: bool,
    pub context: BTreeMap<String, Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    violations: Vec<ViolationKind>,
}

impl DecisionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a blocking error. Clears `allowed`.
    pub fn reject(&mut self, kind: ViolationKind, message: impl Into<String>) {
        self.errors.push(message.into());
        self.violations.push(kind);
        self.allowed = false;
    }

    /// Record a non-blocking warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn set_context(&mut self, key: &str, value: impl Into<Value>) {
        self.context.insert(key.to_string(), value.into());
    }

    /// Derive `allowed` from the collected errors.
    pub fn seal(&mut self) {
        self.allowed = self.errors.is_empty();
    }

    pub fn violations(&self) -> &[ViolationKind] {
        &self.violations
    }

    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.contains(&kind)
    }

    /// Whether a failure was caused only by losing the alias race, which a
    /// caller may retry.
    pub fn is_retryable(&self) -> bool {
        !self.violations.is_empty()
            && self
                .violations
                .iter()
                .all(|k| *k == ViolationKind::PromotionConflict)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
