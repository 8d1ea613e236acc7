//! Operator-side registration of versions and evaluation reports.

use std::sync::Arc;

use mlrelease_state::{
    tags, Alias, AliasRegistry, AliasSwap, EvaluationReport, EvaluationStore, ModelVersion,
    SwapOutcome, TagWrite, VersionId,
};

use crate::domain::{ReleaseError, Result};
use crate::promotion::DEFAULT_MAX_ATTEMPTS;

/// Registers versions and reports for one model.
pub struct Registrar {
    model_name: String,
    registry: Arc<dyn AliasRegistry>,
    evaluations: Arc<dyn EvaluationStore>,
}

impl Registrar {
    pub fn new(
        model_name: impl Into<String>,
        registry: Arc<dyn AliasRegistry>,
        evaluations: Arc<dyn EvaluationStore>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            registry,
            evaluations,
        }
    }

    /// Register a version. With `point_candidate`, also move the `candidate`
    /// alias onto it and mark it `release_status=candidate`.
    pub async fn register(&self, mut version: ModelVersion, point_candidate: bool) -> Result<()> {
        if version.model_name != self.model_name {
            return Err(ReleaseError::InvalidConfig(format!(
                "version belongs to model '{}', registrar manages '{}'",
                version.model_name, self.model_name
            )));
        }
        if point_candidate {
            version
                .tags
                .entry(tags::RELEASE_STATUS.to_string())
                .or_insert_with(|| tags::STATUS_CANDIDATE.to_string());
        }
        let id = version.version.clone();
        self.registry.register_version(version).await?;
        tracing::info!(event = "version.registered", model = %self.model_name, version = %id);

        if point_candidate {
            self.point_candidate(&id).await?;
        }
        Ok(())
    }

    /// Move the `candidate` alias onto an already registered version.
    pub async fn point_candidate(&self, version: &VersionId) -> Result<()> {
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            let current = self
                .registry
                .resolve(&self.model_name, Alias::Candidate)
                .await?;
            if current.as_ref() == Some(version) {
                return Ok(());
            }
            let swap = AliasSwap::new(Alias::Candidate, current, version.clone()).with_tag(
                TagWrite::new(version, tags::RELEASE_STATUS, tags::STATUS_CANDIDATE),
            );
            if let SwapOutcome::Applied { .. } =
                self.registry.compare_and_swap(&self.model_name, swap).await?
            {
                tracing::info!(
                    event = "candidate.pointed",
                    model = %self.model_name,
                    version = %version,
                );
                return Ok(());
            }
        }
        Err(ReleaseError::Conflict {
            operation: "candidate update",
            alias: Alias::Candidate,
            attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Attach an evaluation report to a registered version.
    pub async fn record_report(&self, version: &VersionId, report: EvaluationReport) -> Result<()> {
        // Surface unknown versions before writing an orphan report.
        self.registry.get_version(&self.model_name, version).await?;
        self.evaluations
            .put_report(&self.model_name, version, report)
            .await?;
        Ok(())
    }
}
