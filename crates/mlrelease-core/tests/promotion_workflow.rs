//! Promotion and rollback against the in-memory registry.

use std::sync::Arc;

use mlrelease_core::{
    Alias, AliasRegistry, DecisionReport, EvaluationReport, GateEvaluator, MemoryAliasRegistry,
    MetricRule, MetricRuleSet, ModelVersion, PromotionConfig, PromotionDecisionEngine, Registrar,
    ReleaseError, RollbackManager, VersionId, ViolationKind,
};
use mlrelease_state::tags::{self, REQUIRED_LINEAGE};

const MODEL: &str = "breast_cancer_clf";

fn lineage(version: &str) -> ModelVersion {
    let mut mv = ModelVersion::new(MODEL, version).with_source_run(format!("run-{version}"));
    for key in REQUIRED_LINEAGE {
        mv = mv.with_tag(key, format!("{key}-{version}"));
    }
    mv.with_tag(tags::GATE, tags::GATE_PASSED)
}

fn good_report() -> EvaluationReport {
    EvaluationReport::new(true)
        .with_metric("eval_roc_auc", 0.98)
        .with_metric("eval_accuracy", 0.95)
}

struct Fixture {
    registry: Arc<MemoryAliasRegistry>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            registry: Arc::new(MemoryAliasRegistry::new()),
        }
    }

    fn registrar(&self) -> Registrar {
        Registrar::new(MODEL, self.registry.clone(), self.registry.clone())
    }

    fn engine(&self) -> PromotionDecisionEngine {
        PromotionDecisionEngine::new(MODEL, self.registry.clone(), self.registry.clone())
    }

    fn rollback(&self) -> RollbackManager {
        RollbackManager::new(MODEL, self.registry.clone())
    }

    /// Register a fully tagged, passing version as the candidate.
    async fn candidate(&self, version: &str) {
        let r = self.registrar();
        r.register(lineage(version), true).await.unwrap();
        r.record_report(&VersionId::from(version), good_report())
            .await
            .unwrap();
    }

    async fn promote(&self, version: &str) -> DecisionReport {
        self.engine().decide(&VersionId::from(version), false).await
    }

    async fn prod(&self) -> Option<VersionId> {
        self.registry.resolve(MODEL, Alias::Prod).await.unwrap()
    }

    async fn champion(&self) -> Option<VersionId> {
        self.registry.resolve(MODEL, Alias::Champion).await.unwrap()
    }

    async fn tag(&self, version: &str, key: &str) -> Option<String> {
        self.registry
            .get_version(MODEL, &VersionId::from(version))
            .await
            .unwrap()
            .tag(key)
            .map(str::to_string)
    }
}

#[tokio::test]
async fn every_missing_lineage_subset_blocks_promotion() {
    for mask in 0u8..15 {
        let fx = Fixture::new();
        let mut mv = ModelVersion::new(MODEL, "1").with_source_run("run-1");
        for (i, key) in REQUIRED_LINEAGE.iter().enumerate() {
            if mask & (1 << i) != 0 {
                mv = mv.with_tag(*key, "x");
            }
        }
        fx.registrar().register(mv, true).await.unwrap();
        fx.registrar()
            .record_report(&VersionId::from("1"), good_report())
            .await
            .unwrap();

        let report = fx.engine().decide(&VersionId::from("1"), true).await;
        assert!(!report.allowed, "mask {mask:04b}");
        for (i, key) in REQUIRED_LINEAGE.iter().enumerate() {
            let expected = format!("missing {key}");
            let present = mask & (1 << i) != 0;
            assert_eq!(
                report.errors.contains(&expected),
                !present,
                "mask {mask:04b}, key {key}"
            );
        }
        assert!(report.has_violation(ViolationKind::MetadataMissing));
    }
}

#[tokio::test]
async fn dry_run_allows_without_mutation() {
    let fx = Fixture::new();
    fx.candidate("1").await;

    let report = fx.engine().decide_candidate(true).await;
    assert!(report.allowed, "errors: {:?}", report.errors);
    assert!(report.errors.is_empty());
    assert_eq!(report.context["candidate_version"], "1");
    assert!(report.context["current_prod_version"].is_null());
    assert_eq!(report.context["metrics"]["eval_roc_auc"], 0.98);
    assert_eq!(report.context["dry_run"], true);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("no current prod version")));

    assert_eq!(fx.prod().await, None);
    assert_eq!(
        fx.registry.resolve(MODEL, Alias::Candidate).await.unwrap(),
        Some(VersionId::from("1"))
    );
    assert_eq!(fx.tag("1", tags::RELEASE_STATUS).await.as_deref(), Some("candidate"));
}

#[tokio::test]
async fn promote_moves_prod_and_champion_together() {
    let fx = Fixture::new();
    fx.candidate("1").await;
    assert!(fx.promote("1").await.allowed);

    fx.candidate("2").await;
    let report = fx.promote("2").await;
    assert!(report.allowed, "errors: {:?}", report.errors);
    assert_eq!(report.context["previous_prod_version"], "1");
    assert_eq!(report.context["attempts"], 1);

    assert_eq!(fx.prod().await, Some(VersionId::from("2")));
    assert_eq!(fx.champion().await, Some(VersionId::from("2")));
    assert_eq!(fx.tag("2", tags::PREVIOUS_PROD_VERSION).await.as_deref(), Some("1"));
    assert_eq!(fx.tag("2", tags::RELEASE_STATUS).await.as_deref(), Some("champion"));
    assert_eq!(fx.tag("2", tags::PROMOTED_FROM_ALIAS).await.as_deref(), Some("candidate"));
    assert_eq!(fx.tag("1", tags::RELEASE_STATUS).await.as_deref(), Some("previous_prod"));
}

#[tokio::test]
async fn rollback_restores_previous_and_can_be_undone() {
    let fx = Fixture::new();
    fx.candidate("1").await;
    assert!(fx.promote("1").await.allowed);
    fx.candidate("2").await;
    assert!(fx.promote("2").await.allowed);

    let outcome = fx.rollback().rollback().await.unwrap();
    assert_eq!(outcome.from, VersionId::from("2"));
    assert_eq!(outcome.to, VersionId::from("1"));
    assert_eq!(fx.prod().await, Some(VersionId::from("1")));
    assert_eq!(fx.champion().await, Some(VersionId::from("1")));

    // The rolled-away version keeps its own history.
    assert_eq!(fx.tag("2", tags::PREVIOUS_PROD_VERSION).await.as_deref(), Some("1"));
    assert_eq!(fx.tag("1", tags::PREVIOUS_PROD_VERSION).await.as_deref(), Some("2"));

    let undo = fx.rollback().rollback().await.unwrap();
    assert_eq!(undo.to, VersionId::from("2"));
    assert_eq!(fx.prod().await, Some(VersionId::from("2")));
}

#[tokio::test]
async fn rollback_of_first_release_has_no_target() {
    let fx = Fixture::new();
    fx.candidate("1").await;
    assert!(fx.promote("1").await.allowed);

    let err = fx.rollback().rollback().await.unwrap_err();
    assert!(matches!(err, ReleaseError::NoRollbackTarget { .. }));
    assert!(err.to_string().contains("no rollback target"));
    assert_eq!(fx.prod().await, Some(VersionId::from("1")));
}

#[tokio::test]
async fn gate_failure_names_metric() {
    let fx = Fixture::new();
    let r = fx.registrar();
    r.register(lineage("1"), true).await.unwrap();
    r.record_report(
        &VersionId::from("1"),
        EvaluationReport::new(true).with_metric("eval_roc_auc", 0.91),
    )
    .await
    .unwrap();

    let report = fx.promote("1").await;
    assert!(!report.allowed);
    assert!(report.has_violation(ViolationKind::GateFailed));
    let gate_err = report
        .errors
        .iter()
        .find(|e| e.starts_with("gate failed"))
        .unwrap();
    assert!(gate_err.contains("eval_roc_auc"), "{gate_err}");
    assert_eq!(fx.prod().await, None);
}

#[tokio::test]
async fn failed_gate_tag_blocks_even_with_good_metrics() {
    let fx = Fixture::new();
    let r = fx.registrar();
    r.register(lineage("1").with_tag(tags::GATE, tags::GATE_FAILED), true)
        .await
        .unwrap();
    r.record_report(&VersionId::from("1"), good_report())
        .await
        .unwrap();

    let report = fx.engine().decide_candidate(true).await;
    assert!(!report.allowed);
    assert!(report.errors.iter().any(|e| e.contains("gate tag is 'failed'")));
}

#[tokio::test]
async fn promoting_current_prod_is_a_noop_error() {
    let fx = Fixture::new();
    fx.candidate("1").await;
    assert!(fx.promote("1").await.allowed);

    let report = fx.promote("1").await;
    assert!(!report.allowed);
    assert!(report.errors.contains(&"already prod: 1".to_string()));
    assert!(report.has_violation(ViolationKind::NoopPromotion));
    // The promoted version is now the champion, no longer a candidate.
    assert!(report.has_violation(ViolationKind::InvalidReleaseStatus));
    assert_eq!(fx.tag("1", tags::PREVIOUS_PROD_VERSION).await, None);
}

#[tokio::test]
async fn ineligible_release_status_blocks_promotion() {
    let fx = Fixture::new();
    let r = fx.registrar();
    r.register(
        lineage("1").with_tag(tags::RELEASE_STATUS, tags::STATUS_PREVIOUS_PROD),
        false,
    )
    .await
    .unwrap();
    r.register(lineage("2"), false).await.unwrap();
    for v in ["1", "2"] {
        r.record_report(&VersionId::from(v), good_report())
            .await
            .unwrap();
    }

    let report = fx.promote("1").await;
    assert!(!report.allowed);
    assert!(report.has_violation(ViolationKind::InvalidReleaseStatus));
    assert_eq!(
        report.errors,
        vec!["release_status is 'previous_prod', expected 'candidate'".to_string()]
    );
    assert_eq!(fx.prod().await, None);

    let report = fx.promote("2").await;
    assert!(!report.allowed);
    assert_eq!(report.errors, vec!["missing release_status".to_string()]);
    assert_eq!(fx.prod().await, None);
}

#[tokio::test]
async fn rolled_back_version_cannot_be_promoted_again() {
    let fx = Fixture::new();
    fx.candidate("1").await;
    assert!(fx.promote("1").await.allowed);
    fx.candidate("2").await;
    assert!(fx.promote("2").await.allowed);
    fx.rollback().rollback().await.unwrap();

    let report = fx.engine().decide(&VersionId::from("2"), true).await;
    assert!(!report.allowed);
    assert!(report
        .errors
        .iter()
        .any(|e| e == "release_status is 'champion', expected 'candidate'"));
}

#[tokio::test]
async fn missing_source_run_only_warns() {
    let fx = Fixture::new();
    let mut mv = lineage("1");
    mv.source_run_id = None;
    fx.registrar().register(mv, true).await.unwrap();
    fx.registrar()
        .record_report(&VersionId::from("1"), good_report())
        .await
        .unwrap();

    let report = fx.engine().decide_candidate(true).await;
    assert!(report.allowed);
    assert!(report.warnings.iter().any(|w| w.contains("source_run_id")));
}

#[tokio::test]
async fn custom_threshold_policy_is_used() {
    let fx = Fixture::new();
    fx.candidate("1").await;

    let strict = MetricRuleSet::empty().with_rule(MetricRule::at_least("eval_accuracy", 0.99));
    let engine = fx.engine().with_config(
        PromotionConfig::default().with_gate(GateEvaluator::new(Arc::new(strict))),
    );
    let report = engine.decide_candidate(true).await;
    assert!(!report.allowed);
    assert!(report.errors[0].contains("eval_accuracy"));
    assert_eq!(report.context["thresholds"][0]["type"], "at_least");
}

#[tokio::test]
async fn report_json_has_stable_shape() {
    let fx = Fixture::new();
    fx.candidate("1").await;
    let report = fx.engine().decide_candidate(true).await;

    let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
    let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["allowed", "context", "errors", "warnings"]);
}
