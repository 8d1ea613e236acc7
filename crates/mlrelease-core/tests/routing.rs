//! Request routing: mode resolution, canary determinism, error statuses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mlrelease_core::metrics::METRICS;
use mlrelease_core::router::SeedSource;
use mlrelease_core::{
    Alias, AliasRegistry, BucketSeed, CanaryPct, InferenceBackend, InferenceError,
    InferenceRequest, MemoryAliasRegistry, ModelVersion, Prediction, RequestRouter, RouteError,
    ServingMode, ServingSettings, StorageError, VersionId,
};
use mlrelease_state::{AliasSnapshot, AliasSwap, StorageResult, SwapOutcome};
use serde_json::json;

const MODEL: &str = "breast_cancer_clf";

/// Scores every row with the numeric version id.
struct VersionScorer;

#[async_trait]
impl InferenceBackend for VersionScorer {
    async fn infer(
        &self,
        version: &VersionId,
        _request: &InferenceRequest,
    ) -> Result<Prediction, InferenceError> {
        let v: f64 = version
            .as_str()
            .parse()
            .map_err(|_| InferenceError::InvalidInput(version.to_string()))?;
        Ok(Prediction::new(vec![v]))
    }
}

async fn registry(prod: Option<&str>, candidate: Option<&str>) -> Arc<MemoryAliasRegistry> {
    let reg = Arc::new(MemoryAliasRegistry::new());
    for v in ["1", "2"] {
        reg.register_version(ModelVersion::new(MODEL, v)).await.unwrap();
    }
    if let Some(p) = prod {
        let swap = AliasSwap::new(Alias::Prod, None, VersionId::from(p));
        assert!(reg.compare_and_swap(MODEL, swap).await.unwrap().is_applied());
    }
    if let Some(c) = candidate {
        let swap = AliasSwap::new(Alias::Candidate, None, VersionId::from(c));
        assert!(reg.compare_and_swap(MODEL, swap).await.unwrap().is_applied());
    }
    reg
}

fn router(reg: Arc<dyn AliasRegistry>, pct: u8) -> RequestRouter {
    let settings = ServingSettings::default()
        .with_canary_pct(CanaryPct::try_from(i64::from(pct)).unwrap())
        .with_alias_cache_ttl(Duration::ZERO);
    RequestRouter::new(settings, reg, Arc::new(VersionScorer))
}

fn payload(i: usize) -> InferenceRequest {
    InferenceRequest::new(json!({"features": [i, i * 2, i * 3], "patient": format!("p-{i}")}))
}

#[tokio::test]
async fn prod_and_candidate_modes_serve_their_alias() {
    let r = router(registry(Some("1"), Some("2")).await, 10);

    let prod = r.serve(ServingMode::Prod, payload(0)).await.unwrap();
    assert_eq!(prod.decision.primary.alias, Alias::Prod);
    assert_eq!(prod.prediction.scores, vec![1.0]);

    let cand = r.serve(ServingMode::Candidate, payload(0)).await.unwrap();
    assert_eq!(cand.decision.primary.alias, Alias::Candidate);
    assert_eq!(cand.prediction.scores, vec![2.0]);
    assert!(cand.shadow.is_none());
}

#[tokio::test]
async fn missing_prod_is_service_unavailable() {
    let r = router(registry(None, Some("2")).await, 10);
    let err = r.route(ServingMode::Prod, &payload(0)).await.unwrap_err();
    assert!(matches!(err, RouteError::AliasAbsent(Alias::Prod)));
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn missing_candidate_is_service_unavailable_but_distinguishable() {
    let r = router(registry(Some("1"), None).await, 10);
    let err = r.route(ServingMode::Candidate, &payload(0)).await.unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert!(err.is_alias_absent());
}

#[tokio::test]
async fn canary_choice_is_stable_across_repeated_calls() {
    let r = router(registry(Some("1"), Some("2")).await, 10);
    for i in 0..20 {
        let req = payload(i);
        let first = r.route(ServingMode::Canary, &req).await.unwrap();
        for _ in 0..100 {
            let again = r.route(ServingMode::Canary, &req).await.unwrap();
            assert_eq!(again.primary, first.primary);
            assert_eq!(again.bucket, first.bucket);
        }
        let bucket = first.bucket.unwrap();
        assert_eq!(bucket.seed, SeedSource::Payload);
        let expected = if bucket.bucket < 10 { Alias::Candidate } else { Alias::Prod };
        assert_eq!(first.primary.alias, expected);
    }
}

#[tokio::test]
async fn canary_zero_always_routes_to_prod() {
    let r = router(registry(Some("1"), Some("2")).await, 0);
    for i in 0..200 {
        let d = r.route(ServingMode::Canary, &payload(i)).await.unwrap();
        assert_eq!(d.primary.alias, Alias::Prod);
    }
}

#[tokio::test]
async fn canary_hundred_always_routes_to_candidate() {
    let r = router(registry(Some("1"), Some("2")).await, 100);
    for i in 0..200 {
        let d = r.route(ServingMode::Canary, &payload(i)).await.unwrap();
        assert_eq!(d.primary.alias, Alias::Candidate);
        assert!(!d.candidate_fallback);
    }
}

#[tokio::test]
async fn canary_without_candidate_falls_back_to_prod() {
    let r = router(registry(Some("1"), None).await, 100);
    let d = r.route(ServingMode::Canary, &payload(3)).await.unwrap();
    assert_eq!(d.primary.alias, Alias::Prod);
    assert!(d.candidate_fallback);
}

#[tokio::test]
async fn canary_split_is_roughly_proportional() {
    let r = router(registry(Some("1"), Some("2")).await, 10);
    let mut to_candidate = 0;
    for i in 0..2_000 {
        let d = r.route(ServingMode::Canary, &payload(i)).await.unwrap();
        if d.primary.alias == Alias::Candidate {
            to_candidate += 1;
        }
    }
    assert!((100..=300).contains(&to_candidate), "{to_candidate}");
}

#[tokio::test]
async fn request_id_seed_keeps_a_caller_sticky() {
    let reg = registry(Some("1"), Some("2")).await;
    let settings = ServingSettings::default()
        .with_canary_pct(CanaryPct::try_from(50_i64).unwrap())
        .with_bucket_seed(BucketSeed::RequestId);
    let r = RequestRouter::new(settings, reg, Arc::new(VersionScorer));

    let first = r
        .route(ServingMode::Canary, &payload(0).with_request_id("caller-9"))
        .await
        .unwrap();
    for i in 1..50 {
        let d = r
            .route(ServingMode::Canary, &payload(i).with_request_id("caller-9"))
            .await
            .unwrap();
        assert_eq!(d.primary, first.primary);
        assert_eq!(d.bucket.unwrap().seed, SeedSource::RequestId);
    }
}

#[test]
fn unknown_mode_is_a_client_error() {
    let err = ServingMode::parse_optional(Some("blue-green")).unwrap_err();
    assert!(matches!(err, RouteError::UnknownMode(_)));
    assert_eq!(err.status_code(), 400);
}

/// A registry whose every read fails.
struct DownRegistry;

#[async_trait]
impl AliasRegistry for DownRegistry {
    async fn register_version(&self, _version: ModelVersion) -> StorageResult<()> {
        Err(StorageError::Unavailable("down".into()))
    }

    async fn get_version(&self, _model: &str, _version: &VersionId) -> StorageResult<ModelVersion> {
        Err(StorageError::Unavailable("down".into()))
    }

    async fn list_versions(&self, _model: &str) -> StorageResult<Vec<ModelVersion>> {
        Err(StorageError::Unavailable("down".into()))
    }

    async fn resolve(&self, _model: &str, _alias: Alias) -> StorageResult<Option<VersionId>> {
        Err(StorageError::Unavailable("down".into()))
    }

    async fn snapshot(&self, _model: &str) -> StorageResult<AliasSnapshot> {
        Err(StorageError::Unavailable("down".into()))
    }

    async fn compare_and_swap(&self, _model: &str, _swap: AliasSwap) -> StorageResult<SwapOutcome> {
        Err(StorageError::Unavailable("down".into()))
    }
}

#[tokio::test]
async fn registry_outage_is_503_and_not_alias_absence() {
    let r = router(Arc::new(DownRegistry), 10);
    for mode in ServingMode::ALL {
        let err = r.route(mode, &payload(1)).await.unwrap_err();
        assert_eq!(err.status_code(), 503, "{mode}");
        assert!(!err.is_alias_absent(), "{mode}");
        assert!(matches!(err, RouteError::RegistryUnavailable { .. }));
    }

    let ready = r.readiness().await;
    assert!(!ready.ready);
    assert!(ready.error.unwrap().contains("down"));
}

#[tokio::test]
async fn primary_inference_failure_is_500() {
    let reg = Arc::new(MemoryAliasRegistry::new());
    reg.register_version(ModelVersion::new(MODEL, "not-a-number"))
        .await
        .unwrap();
    let swap = AliasSwap::new(Alias::Prod, None, VersionId::from("not-a-number"));
    reg.compare_and_swap(MODEL, swap).await.unwrap();

    let r = router(reg, 10);
    let err = r.serve(ServingMode::Prod, payload(0)).await.unwrap_err();
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn served_requests_are_counted_by_status_with_latency() {
    // Counters are process-wide and other tests serve concurrently, so
    // compare lower bounds.
    let statuses = [200_u16, 400, 503, 500];
    let before = statuses.map(|s| METRICS.served(s));
    let latency_before = METRICS.serve_latency_count();

    let reg = registry(Some("1"), None).await;
    reg.register_version(ModelVersion::new(MODEL, "broken"))
        .await
        .unwrap();
    let swap = AliasSwap::new(Alias::Candidate, None, VersionId::from("broken"));
    assert!(reg.compare_and_swap(MODEL, swap).await.unwrap().is_applied());
    let r = router(reg, 10);

    r.serve(ServingMode::Prod, payload(0)).await.unwrap();
    let err = r.serve_named("blue-green", payload(0)).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    let err = r.serve(ServingMode::Candidate, payload(0)).await.unwrap_err();
    assert_eq!(err.status_code(), 500);

    let empty = router(registry(None, None).await, 10);
    let err = empty.serve_named("prod", payload(0)).await.unwrap_err();
    assert_eq!(err.status_code(), 503);

    let after = statuses.map(|s| METRICS.served(s));
    for (i, status) in statuses.iter().enumerate() {
        assert!(after[i] > before[i], "status {status} not counted");
    }
    assert!(METRICS.serve_latency_count() >= latency_before + 4);
}

#[tokio::test]
async fn route_alone_never_claims_a_shadow_ran() {
    let r = router(registry(Some("1"), Some("2")).await, 10);

    let decision = r.route(ServingMode::Shadow, &payload(0)).await.unwrap();
    assert_eq!(decision.secondary.map(|s| s.version), Some(VersionId::from("2")));
    assert!(!decision.shadow_attempted);

    let served = r.serve(ServingMode::Shadow, payload(0)).await.unwrap();
    assert!(served.decision.shadow_attempted);
    assert!(served.shadow.is_some());
}
