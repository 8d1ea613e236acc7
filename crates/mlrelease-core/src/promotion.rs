//! Promotion decision engine.
//!
//! Validates a version against the release policy and, outside dry-run,
//! moves `prod` (and with it `champion`) onto it with a compare-and-set
//! against the last observed prod value. Lost races are retried a bounded
//! number of times.

use std::sync::Arc;

use mlrelease_state::tags::{self, REQUIRED_LINEAGE};
use mlrelease_state::{
    Alias, AliasRegistry, AliasSnapshot, AliasSwap, EvaluationStore, ModelVersion, StorageError,
    SwapOutcome, TagWrite, VersionId,
};
use serde_json::{json, Map, Value};
use tracing::Instrument;

use crate::domain::{DecisionReport, ViolationKind};
use crate::gate::GateEvaluator;
use crate::metadata::missing_required_tags;
use crate::metrics::METRICS;
use crate::obs::{self, release_span};

/// Default number of compare-and-set attempts per promotion.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunables for [`PromotionDecisionEngine`].
#[derive(Debug, Clone)]
pub struct PromotionConfig {
    /// Compare-and-set attempts before reporting a conflict. At least 1.
    pub max_attempts: u32,
    pub gate: GateEvaluator,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            gate: GateEvaluator::default(),
        }
    }
}

impl PromotionConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_gate(mut self, gate: GateEvaluator) -> Self {
        self.gate = gate;
        self
    }
}

/// Decides whether a version may become prod, and applies the promotion.
pub struct PromotionDecisionEngine {
    model_name: String,
    registry: Arc<dyn AliasRegistry>,
    evaluations: Arc<dyn EvaluationStore>,
    config: PromotionConfig,
}

impl PromotionDecisionEngine {
    pub fn new(
        model_name: impl Into<String>,
        registry: Arc<dyn AliasRegistry>,
        evaluations: Arc<dyn EvaluationStore>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            registry,
            evaluations,
            config: PromotionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PromotionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Evaluate (and unless `dry_run`, apply) promotion of whatever the
    /// `candidate` alias points at.
    pub async fn decide_candidate(&self, dry_run: bool) -> DecisionReport {
        self.decide_candidate_inner(dry_run)
            .instrument(release_span("promote", &self.model_name))
            .await
    }

    async fn decide_candidate_inner(&self, dry_run: bool) -> DecisionReport {
        match self.registry.resolve(&self.model_name, Alias::Candidate).await {
            Ok(Some(version)) => self.decide_inner(&version, dry_run).await,
            Ok(None) => {
                let mut report = self.base_report(dry_run);
                report.reject(ViolationKind::MissingAlias, "missing alias candidate");
                report.seal();
                report
            }
            Err(e) => {
                let mut report = self.base_report(dry_run);
                report.reject(ViolationKind::Registry, format!("registry unavailable: {e}"));
                report.seal();
                report
            }
        }
    }

    /// Evaluate (and unless `dry_run`, apply) promotion of `version`.
    pub async fn decide(&self, version: &VersionId, dry_run: bool) -> DecisionReport {
        self.decide_inner(version, dry_run)
            .instrument(release_span("promote", &self.model_name))
            .await
    }

    fn base_report(&self, dry_run: bool) -> DecisionReport {
        let mut report = DecisionReport::new();
        report.set_context("model_name", self.model_name.as_str());
        report.set_context("dry_run", dry_run);
        report.set_context("thresholds", self.config.gate.thresholds());
        report
    }

    async fn decide_inner(&self, version: &VersionId, dry_run: bool) -> DecisionReport {
        let mut report = self.base_report(dry_run);
        report.set_context("candidate_version", version.as_str());

        let snapshot = match self.registry.snapshot(&self.model_name).await {
            Ok(s) => s,
            Err(e) => {
                report.reject(ViolationKind::Registry, format!("registry unavailable: {e}"));
                return self.finish(version, report, dry_run);
            }
        };
        report.set_context("current_prod_version", version_value(snapshot.prod.as_ref()));

        let record = match self.registry.get_version(&self.model_name, version).await {
            Ok(mv) => Some(mv),
            Err(StorageError::VersionNotFound { .. }) => {
                report.reject(
                    ViolationKind::MetadataMissing,
                    format!("version {version} is not registered"),
                );
                None
            }
            Err(e) => {
                report.reject(ViolationKind::Registry, format!("registry unavailable: {e}"));
                return self.finish(version, report, dry_run);
            }
        };

        // Lineage
        for key in missing_required_tags(record.as_ref().map(|mv| &mv.tags)) {
            report.reject(ViolationKind::MetadataMissing, format!("missing {key}"));
        }
        report.set_context("candidate_tags", candidate_tags(record.as_ref()));

        // Evaluation gate
        let evaluation = match self.evaluations.get_report(&self.model_name, version).await {
            Ok(r) => r,
            Err(e) => {
                report.reject(ViolationKind::Registry, format!("registry unavailable: {e}"));
                return self.finish(version, report, dry_run);
            }
        };
        let verdict = self.config.gate.evaluate(evaluation.as_ref());
        report.set_context(
            "metrics",
            evaluation
                .as_ref()
                .and_then(|r| serde_json::to_value(&r.metrics).ok())
                .unwrap_or(Value::Null),
        );
        report.set_context("gate_passed", verdict.passed);
        if let Some(reason) = verdict.reason() {
            report.reject(ViolationKind::GateFailed, format!("gate failed: {reason}"));
        }
        if let Some(gate_tag) = record.as_ref().and_then(|mv| mv.tag(tags::GATE)) {
            if gate_tag != tags::GATE_PASSED {
                report.reject(
                    ViolationKind::GateFailed,
                    format!("gate tag is '{gate_tag}', expected '{}'", tags::GATE_PASSED),
                );
            }
        }

        if let Some(mv) = &record {
            match mv.tag(tags::RELEASE_STATUS) {
                Some(tags::STATUS_CANDIDATE) => {}
                Some(other) => report.reject(
                    ViolationKind::InvalidReleaseStatus,
                    format!(
                        "release_status is '{other}', expected '{}'",
                        tags::STATUS_CANDIDATE
                    ),
                ),
                None => report.reject(
                    ViolationKind::InvalidReleaseStatus,
                    format!("missing {}", tags::RELEASE_STATUS),
                ),
            }
        }

        if snapshot.prod.as_ref() == Some(version) {
            report.reject(ViolationKind::NoopPromotion, format!("already prod: {version}"));
        }

        if let Some(mv) = &record {
            self.collect_warnings(mv, &snapshot, &mut report);
        }

        report.seal();
        obs::emit_promotion_decided(
            &self.model_name,
            version,
            report.allowed,
            dry_run,
            report.errors.len(),
            report.warnings.len(),
        );

        if report.allowed && !dry_run {
            let from_candidate = snapshot.candidate.as_ref() == Some(version);
            self.apply(version, snapshot.prod, from_candidate, &mut report)
                .await;
        }
        report
    }

    fn collect_warnings(
        &self,
        mv: &ModelVersion,
        snapshot: &AliasSnapshot,
        report: &mut DecisionReport,
    ) {
        let has_run = mv
            .source_run_id
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
            || mv.tag(tags::SOURCE_RUN_ID).is_some();
        if !has_run {
            report.warn("missing source_run_id; promotion will not be traceable to a training run");
        }

        if snapshot.prod.is_none() {
            report.warn(
                "no current prod version; rollback will not be possible after this promotion",
            );
        }
    }

    fn finish(
        &self,
        version: &VersionId,
        mut report: DecisionReport,
        dry_run: bool,
    ) -> DecisionReport {
        report.seal();
        obs::emit_promotion_decided(
            &self.model_name,
            version,
            report.allowed,
            dry_run,
            report.errors.len(),
            report.warnings.len(),
        );
        report
    }

    async fn apply(
        &self,
        version: &VersionId,
        observed: Option<VersionId>,
        from_candidate: bool,
        report: &mut DecisionReport,
    ) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut expected = observed;

        for attempt in 1..=max_attempts {
            if expected.as_ref() == Some(version) {
                report.reject(
                    ViolationKind::PromotionConflict,
                    format!("promotion conflict: prod was moved to {version} concurrently"),
                );
                report.set_context("attempts", attempt);
                METRICS.inc_promotion_conflicts();
                return;
            }

            let swap = promotion_swap(version, expected.clone(), from_candidate);
            match self.registry.compare_and_swap(&self.model_name, swap).await {
                Ok(SwapOutcome::Applied { previous, revision }) => {
                    obs::emit_promotion_applied(
                        &self.model_name,
                        version,
                        previous.as_ref(),
                        attempt,
                        revision,
                    );
                    METRICS.inc_promotions_applied();
                    report.set_context("previous_prod_version", version_value(previous.as_ref()));
                    report.set_context("attempts", attempt);
                    report.set_context("revision", revision);
                    return;
                }
                Ok(SwapOutcome::Conflict { expected: stale, actual }) => {
                    obs::emit_promotion_conflict(
                        &self.model_name,
                        version,
                        attempt,
                        stale.as_ref(),
                        actual.as_ref(),
                    );
                    expected = actual;
                }
                Err(e) => {
                    report.reject(
                        ViolationKind::Registry,
                        format!("registry error while applying promotion: {e}"),
                    );
                    report.set_context("attempts", attempt);
                    return;
                }
            }
        }

        METRICS.inc_promotion_conflicts();
        report.reject(
            ViolationKind::PromotionConflict,
            format!(
                "promotion conflict: prod changed concurrently on all {max_attempts} attempts"
            ),
        );
        report.set_context("attempts", max_attempts);
    }
}

/// Build the prod swap for `version`, carrying the release bookkeeping tags.
fn promotion_swap(
    version: &VersionId,
    expected: Option<VersionId>,
    from_candidate: bool,
) -> AliasSwap {
    let mut swap = AliasSwap::new(Alias::Prod, expected.clone(), version.clone())
        .with_tag(TagWrite::new(version, tags::RELEASE_STATUS, tags::STATUS_CHAMPION));
    if from_candidate {
        swap = swap.with_tag(TagWrite::new(
            version,
            tags::PROMOTED_FROM_ALIAS,
            Alias::Candidate.as_str(),
        ));
    }
    if let Some(prev) = &expected {
        swap = swap
            .with_tag(TagWrite::new(version, tags::PREVIOUS_PROD_VERSION, prev.as_str()))
            .with_tag(TagWrite::new(prev, tags::RELEASE_STATUS, tags::STATUS_PREVIOUS_PROD));
    }
    swap
}

fn version_value(v: Option<&VersionId>) -> Value {
    v.map(|v| Value::String(v.as_str().to_string()))
        .unwrap_or(Value::Null)
}

/// The subset of a version's tags relevant to the decision.
fn candidate_tags(record: Option<&ModelVersion>) -> Value {
    let Some(mv) = record else {
        return Value::Null;
    };
    let mut subset = Map::new();
    for key in REQUIRED_LINEAGE
        .iter()
        .chain([tags::GATE, tags::RELEASE_STATUS].iter())
    {
        if let Some(v) = mv.tags.get(*key) {
            subset.insert(key.to_string(), json!(v));
        }
    }
    Value::Object(subset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlrelease_state::MemoryAliasRegistry;

    #[test]
    fn first_promotion_swap_has_no_previous() {
        let swap = promotion_swap(&VersionId::from("1"), None, true);
        assert_eq!(swap.expected, None);
        let keys: Vec<&str> = swap.tag_writes.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(keys, [tags::RELEASE_STATUS, tags::PROMOTED_FROM_ALIAS]);
    }

    #[test]
    fn swap_records_previous_prod_on_both_versions() {
        let swap = promotion_swap(&VersionId::from("2"), Some(VersionId::from("1")), false);
        assert_eq!(swap.expected, Some(VersionId::from("1")));

        let back_ref = swap
            .tag_writes
            .iter()
            .find(|w| w.key == tags::PREVIOUS_PROD_VERSION)
            .unwrap();
        assert_eq!(back_ref.version, VersionId::from("2"));
        assert_eq!(back_ref.value, "1");

        let demoted = swap
            .tag_writes
            .iter()
            .find(|w| w.version == VersionId::from("1"))
            .unwrap();
        assert_eq!(demoted.value, tags::STATUS_PREVIOUS_PROD);
        assert!(!swap
            .tag_writes
            .iter()
            .any(|w| w.key == tags::PROMOTED_FROM_ALIAS));
    }

    #[test]
    fn candidate_tags_keeps_relevant_keys() {
        let mv = ModelVersion::new("m", "1")
            .with_tag(tags::GIT_SHA, "abc")
            .with_tag(tags::GATE, "passed")
            .with_tag("unrelated", "x");
        let subset = candidate_tags(Some(&mv));
        assert_eq!(subset, json!({"git_sha": "abc", "gate": "passed"}));
        assert_eq!(candidate_tags(None), Value::Null);
    }

    #[tokio::test]
    async fn unregistered_version_is_rejected_not_raised() {
        let reg = Arc::new(MemoryAliasRegistry::new());
        let engine = PromotionDecisionEngine::new("m", reg.clone(), reg);
        let report = engine.decide(&VersionId::from("9"), true).await;
        assert!(!report.allowed);
        assert!(report.errors.iter().any(|e| e.contains("not registered")));
        assert!(report.errors.iter().any(|e| e == "missing git_sha"));
        assert!(report.has_violation(ViolationKind::GateFailed));
    }

    #[tokio::test]
    async fn missing_candidate_alias_is_reported() {
        let reg = Arc::new(MemoryAliasRegistry::new());
        let engine = PromotionDecisionEngine::new("m", reg.clone(), reg);
        let report = engine.decide_candidate(true).await;
        assert!(!report.allowed);
        assert_eq!(report.errors, vec!["missing alias candidate".to_string()]);
        assert!(report.has_violation(ViolationKind::MissingAlias));
    }
}
