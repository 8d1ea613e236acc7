//! One-step prod rollback.
//!
//! Restores `prod` to the version named by the current prod's
//! `previous_prod_version` tag. The restored version in turn gets a
//! `previous_prod_version` pointing at the version rolled away from, so a
//! second rollback undoes the first. The rolled-away version is left as is.

use std::sync::Arc;

use mlrelease_state::{tags, Alias, AliasRegistry, AliasSwap, SwapOutcome, TagWrite, VersionId};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::domain::{ReleaseError, Result};
use crate::metrics::METRICS;
use crate::obs::{self, release_span};
use crate::promotion::DEFAULT_MAX_ATTEMPTS;

/// The versions a rollback moved between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub from: VersionId,
    pub to: VersionId,
}

pub struct RollbackManager {
    model_name: String,
    registry: Arc<dyn AliasRegistry>,
    max_attempts: u32,
}

impl RollbackManager {
    pub fn new(model_name: impl Into<String>, registry: Arc<dyn AliasRegistry>) -> Self {
        Self {
            model_name: model_name.into(),
            registry,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Move `prod` back to its recorded predecessor.
    ///
    /// Fails with [`ReleaseError::NoRollbackTarget`] when the current prod has
    /// no predecessor tag, and with [`ReleaseError::Conflict`] when prod keeps
    /// moving underneath every attempt.
    pub async fn rollback(&self) -> Result<RollbackOutcome> {
        self.rollback_inner()
            .instrument(release_span("rollback", &self.model_name))
            .await
    }

    async fn rollback_inner(&self) -> Result<RollbackOutcome> {
        for attempt in 1..=self.max_attempts {
            let current = self
                .registry
                .resolve(&self.model_name, Alias::Prod)
                .await?
                .ok_or(ReleaseError::AliasUnresolved(Alias::Prod))?;

            let record = self.registry.get_version(&self.model_name, &current).await?;
            let target = record
                .tag(tags::PREVIOUS_PROD_VERSION)
                .map(VersionId::from)
                .ok_or_else(|| ReleaseError::NoRollbackTarget {
                    current: current.clone(),
                })?;

            let swap = AliasSwap::new(Alias::Prod, Some(current.clone()), target.clone())
                .with_tag(TagWrite::new(
                    &target,
                    tags::PREVIOUS_PROD_VERSION,
                    current.as_str(),
                ))
                .with_tag(TagWrite::new(&target, tags::RELEASE_STATUS, tags::STATUS_CHAMPION));

            match self.registry.compare_and_swap(&self.model_name, swap).await? {
                SwapOutcome::Applied { .. } => {
                    obs::emit_rollback_applied(&self.model_name, &current, &target, attempt);
                    METRICS.inc_rollbacks();
                    return Ok(RollbackOutcome {
                        from: current,
                        to: target,
                    });
                }
                SwapOutcome::Conflict { actual, .. } => {
                    tracing::warn!(
                        event = "rollback.conflict",
                        model = %self.model_name,
                        attempt = attempt,
                        expected = %current,
                        actual = ?actual.as_ref().map(VersionId::as_str),
                    );
                }
            }
        }

        Err(ReleaseError::Conflict {
            operation: "rollback",
            alias: Alias::Prod,
            attempts: self.max_attempts,
        })
    }
}
