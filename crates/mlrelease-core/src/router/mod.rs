//! Request routing across model aliases.
//!
//! Each request names a [`ServingMode`]. The router resolves the aliases the
//! mode needs (through a short-lived cache), picks the version that answers,
//! and in shadow mode fires the candidate concurrently for observation only.
//!
//! Modes:
//! - `prod`: serve `prod`.
//! - `candidate`: serve `candidate`.
//! - `canary`: serve `candidate` when the request's bucket is below the
//!   canary percentage and a candidate exists, else `prod`.
//! - `shadow`: serve `prod`; run `candidate` on the side.

pub mod backend;
pub mod bucket;
pub mod cache;
pub mod error;
pub mod mode;
pub mod shadow;

use std::sync::Arc;

use mlrelease_state::{Alias, AliasRegistry, StorageError, VersionId};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

pub use backend::{FnBackend, InferenceBackend, InferenceRequest, Prediction};
pub use bucket::{BucketAssignment, SeedSource};
pub use cache::AliasCache;
pub use error::{InferenceError, RouteError};
pub use mode::ServingMode;
pub use shadow::{ShadowHandle, ShadowOutcome};

use crate::metrics::METRICS;
use crate::obs;
use crate::settings::ServingSettings;

/// An alias and the version it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAlias {
    pub alias: Alias,
    pub version: VersionId,
}

/// Where one request was sent. Ephemeral, one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: String,
    pub mode: ServingMode,
    /// The version whose output is returned.
    pub primary: ResolvedAlias,
    /// The shadow target, when one was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<ResolvedAlias>,
    /// Canary bucket (canary mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<BucketAssignment>,
    /// Canary picked the candidate but none existed, so prod served.
    #[serde(default)]
    pub candidate_fallback: bool,
    /// A shadow invocation was spawned. Only [`RequestRouter::serve`] sets it.
    pub shadow_attempted: bool,
}

/// A served request.
#[derive(Debug)]
pub struct RoutedResponse {
    pub decision: RoutingDecision,
    pub prediction: Prediction,
    /// Running shadow invocation, in shadow mode with a candidate.
    pub shadow: Option<ShadowHandle>,
}

/// Liveness of the alias the router depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub model_name: String,
    pub prod: Option<VersionId>,
    pub candidate: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RequestRouter {
    settings: ServingSettings,
    registry: Arc<dyn AliasRegistry>,
    backend: Arc<dyn InferenceBackend>,
    cache: AliasCache,
}

impl RequestRouter {
    pub fn new(
        settings: ServingSettings,
        registry: Arc<dyn AliasRegistry>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        let cache = AliasCache::new(settings.alias_cache_ttl);
        Self {
            settings,
            registry,
            backend,
            cache,
        }
    }

    pub fn settings(&self) -> &ServingSettings {
        &self.settings
    }

    /// Drop cached alias resolutions.
    pub async fn invalidate_cache(&self) {
        self.cache.invalidate().await;
    }

    /// Resolve which version(s) a request goes to, without running inference.
    pub async fn route(
        &self,
        mode: ServingMode,
        request: &InferenceRequest,
    ) -> Result<RoutingDecision, RouteError> {
        self.route_as(&request_id_for(request), mode, request).await
    }

    async fn route_as(
        &self,
        request_id: &str,
        mode: ServingMode,
        request: &InferenceRequest,
    ) -> Result<RoutingDecision, RouteError> {
        let decision = match mode {
            ServingMode::Prod => self.single(request_id, mode, Alias::Prod).await?,
            ServingMode::Candidate => self.single(request_id, mode, Alias::Candidate).await?,
            ServingMode::Canary => self.canary(request_id, request).await?,
            ServingMode::Shadow => self.shadow(request_id).await?,
        };

        METRICS.inc_routed(mode);
        obs::emit_route_decided(
            &decision.request_id,
            mode.as_str(),
            &decision.primary.version,
            decision.bucket.map(|b| b.bucket),
            decision.secondary.is_some(),
        );
        Ok(decision)
    }

    /// Route and run a request. In shadow mode the candidate runs
    /// concurrently and never affects the returned result.
    ///
    /// Every call is counted by outcome status with its latency, and logged
    /// as `route.served`.
    pub async fn serve(
        &self,
        mode: ServingMode,
        request: InferenceRequest,
    ) -> Result<RoutedResponse, RouteError> {
        let started = Instant::now();
        let request_id = request_id_for(&request);

        let decision = match self.route_as(&request_id, mode, &request).await {
            Ok(d) => d,
            Err(e) => {
                record_served(&request_id, mode.as_str(), e.status_code(), None, started);
                return Err(e);
            }
        };
        let chosen = decision.primary.alias;

        let result = self.run(decision, request).await;
        let status = result.as_ref().map_or_else(RouteError::status_code, |_| 200);
        record_served(&request_id, mode.as_str(), status, Some(chosen), started);
        result
    }

    /// Parse `mode` and serve. An unknown mode is counted as a 400.
    pub async fn serve_named(
        &self,
        mode: &str,
        request: InferenceRequest,
    ) -> Result<RoutedResponse, RouteError> {
        let started = Instant::now();
        match mode.parse::<ServingMode>() {
            Ok(mode) => self.serve(mode, request).await,
            Err(e) => {
                let request_id = request_id_for(&request);
                record_served(&request_id, mode, e.status_code(), None, started);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        mut decision: RoutingDecision,
        request: InferenceRequest,
    ) -> Result<RoutedResponse, RouteError> {
        let (primary_tx, shadow) = match &decision.secondary {
            Some(target) => {
                let (tx, rx) = oneshot::channel();
                let handle = shadow::spawn_shadow(
                    Arc::clone(&self.backend),
                    target.version.clone(),
                    request.clone(),
                    decision.request_id.clone(),
                    self.settings.shadow_timeout,
                    rx,
                );
                decision.shadow_attempted = true;
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let prediction = self
            .backend
            .infer(&decision.primary.version, &request)
            .await?;
        if let Some(tx) = primary_tx {
            // The shadow may already have finished or been abandoned.
            let _ = tx.send(prediction.clone());
        }

        Ok(RoutedResponse {
            decision,
            prediction,
            shadow,
        })
    }

    /// Report whether `prod` resolves. Reads the registry directly.
    pub async fn readiness(&self) -> Readiness {
        let model_name = self.settings.model_name.clone();
        match self.registry.snapshot(&model_name).await {
            Ok(snapshot) => Readiness {
                ready: snapshot.prod.is_some(),
                model_name,
                prod: snapshot.prod,
                candidate: snapshot.candidate,
                error: None,
            },
            Err(e) => Readiness {
                ready: false,
                model_name,
                prod: None,
                candidate: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn single(
        &self,
        request_id: &str,
        mode: ServingMode,
        alias: Alias,
    ) -> Result<RoutingDecision, RouteError> {
        let version = self.require(request_id, mode, alias).await?;
        Ok(new_decision(request_id, mode, ResolvedAlias { alias, version }))
    }

    async fn canary(
        &self,
        request_id: &str,
        request: &InferenceRequest,
    ) -> Result<RoutingDecision, RouteError> {
        let mode = ServingMode::Canary;
        let assignment = bucket::assign(self.settings.bucket_seed, request);

        let mut fallback = false;
        let primary = if self.settings.canary_pct.admits(assignment.bucket) {
            match self.lookup(request_id, Alias::Candidate).await? {
                Some(version) => {
                    METRICS.inc_canary_candidate_hits();
                    ResolvedAlias {
                        alias: Alias::Candidate,
                        version,
                    }
                }
                None => {
                    METRICS.inc_candidate_fallbacks();
                    fallback = true;
                    self.resolved_prod(request_id, mode).await?
                }
            }
        } else {
            self.resolved_prod(request_id, mode).await?
        };

        let mut d = new_decision(request_id, mode, primary);
        d.bucket = Some(assignment);
        d.candidate_fallback = fallback;
        Ok(d)
    }

    async fn shadow(&self, request_id: &str) -> Result<RoutingDecision, RouteError> {
        let mode = ServingMode::Shadow;
        let primary = self.resolved_prod(request_id, mode).await?;

        // The shadow target is best effort; a failed lookup only skips it.
        let secondary = match self.lookup(request_id, Alias::Candidate).await {
            Ok(Some(version)) => Some(ResolvedAlias {
                alias: Alias::Candidate,
                version,
            }),
            Ok(None) | Err(_) => None,
        };

        let mut d = new_decision(request_id, mode, primary);
        d.secondary = secondary;
        Ok(d)
    }

    async fn resolved_prod(
        &self,
        request_id: &str,
        mode: ServingMode,
    ) -> Result<ResolvedAlias, RouteError> {
        let version = self.require(request_id, mode, Alias::Prod).await?;
        Ok(ResolvedAlias {
            alias: Alias::Prod,
            version,
        })
    }

    /// Resolve an alias that must be set.
    async fn require(
        &self,
        request_id: &str,
        mode: ServingMode,
        alias: Alias,
    ) -> Result<VersionId, RouteError> {
        match self.lookup(request_id, alias).await? {
            Some(version) => Ok(version),
            None => {
                METRICS.inc_alias_absent();
                obs::emit_alias_absent(request_id, mode.as_str(), alias.as_str());
                Err(RouteError::AliasAbsent(alias))
            }
        }
    }

    /// Resolve an alias through the cache. Registry failures are counted and
    /// logged here and never cached.
    async fn lookup(
        &self,
        request_id: &str,
        alias: Alias,
    ) -> Result<Option<VersionId>, RouteError> {
        if let Some(hit) = self.cache.get(alias).await {
            return Ok(hit);
        }
        match self.registry.resolve(&self.settings.model_name, alias).await {
            Ok(value) => {
                self.cache.put(alias, value.clone()).await;
                Ok(value)
            }
            Err(source) => Err(self.registry_failure(request_id, alias, source)),
        }
    }

    fn registry_failure(&self, request_id: &str, alias: Alias, source: StorageError) -> RouteError {
        METRICS.inc_registry_errors();
        obs::emit_registry_error(request_id, alias.as_str(), &source);
        RouteError::RegistryUnavailable { alias, source }
    }
}

fn request_id_for(request: &InferenceRequest) -> String {
    request
        .client_request_id()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn record_served(
    request_id: &str,
    mode: &str,
    status: u16,
    chosen: Option<Alias>,
    started: Instant,
) {
    let latency_ms = started.elapsed().as_millis() as u64;
    METRICS.record_served(status, latency_ms);
    obs::emit_route_served(
        request_id,
        mode,
        status,
        chosen.map(|a| a.as_str()),
        latency_ms,
    );
}

fn new_decision(request_id: &str, mode: ServingMode, primary: ResolvedAlias) -> RoutingDecision {
    RoutingDecision {
        request_id: request_id.to_string(),
        mode,
        primary,
        secondary: None,
        bucket: None,
        candidate_fallback: false,
        shadow_attempted: false,
    }
}
