//! Shadow execution.
//!
//! The candidate runs on its own task under a time budget while the primary
//! path proceeds. The primary never awaits it. On budget expiry the
//! inference task is aborted and its result, if any, is discarded.

use std::sync::Arc;
use std::time::Duration;

use mlrelease_state::VersionId;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backend::{InferenceBackend, InferenceRequest, Prediction};
use crate::metrics::METRICS;
use crate::obs;

/// What happened to one shadow invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShadowOutcome {
    Completed {
        version: VersionId,
        /// Mean absolute score difference against the primary, when the
        /// primary also succeeded.
        divergence: Option<f64>,
        elapsed_ms: u64,
    },
    Failed {
        version: VersionId,
        error: String,
    },
    TimedOut {
        version: VersionId,
        budget_ms: u64,
    },
}

impl ShadowOutcome {
    pub fn version(&self) -> &VersionId {
        match self {
            ShadowOutcome::Completed { version, .. }
            | ShadowOutcome::Failed { version, .. }
            | ShadowOutcome::TimedOut { version, .. } => version,
        }
    }
}

/// Handle on a running shadow invocation. Dropping it does not cancel the
/// shadow; the outcome is still logged.
#[derive(Debug)]
pub struct ShadowHandle {
    version: VersionId,
    task: JoinHandle<ShadowOutcome>,
}

impl ShadowHandle {
    pub fn version(&self) -> &VersionId {
        &self.version
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the shadow to settle. Bounded by the shadow budget, which also
    /// covers waiting for the primary prediction.
    pub async fn outcome(self) -> ShadowOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => ShadowOutcome::Failed {
                version: self.version,
                error: format!("shadow task aborted: {e}"),
            },
        }
    }
}

/// Spawn the shadow invocation of `version`.
///
/// `primary` delivers the primary prediction for the divergence comparison.
/// The wait for it shares the shadow budget. If the sender is dropped
/// (primary failed) or the budget runs out first, no divergence is recorded.
pub(crate) fn spawn_shadow(
    backend: Arc<dyn InferenceBackend>,
    version: VersionId,
    request: InferenceRequest,
    request_id: String,
    budget: Duration,
    primary: oneshot::Receiver<Prediction>,
) -> ShadowHandle {
    METRICS.inc_shadow_started();
    let task_version = version.clone();
    let task = tokio::spawn(async move {
        let started = Instant::now();
        let infer_version = task_version.clone();
        let mut inference =
            tokio::spawn(async move { backend.infer(&infer_version, &request).await });

        let budget_ms = budget.as_millis() as u64;
        match tokio::time::timeout(budget, &mut inference).await {
            Err(_) => {
                inference.abort();
                METRICS.inc_shadow_timed_out();
                obs::emit_shadow_timed_out(&request_id, &task_version, budget_ms);
                ShadowOutcome::TimedOut {
                    version: task_version,
                    budget_ms,
                }
            }
            Ok(Err(join_err)) => {
                let error = format!("shadow inference panicked: {join_err}");
                METRICS.inc_shadow_failed();
                obs::emit_shadow_failed(&request_id, &task_version, &error);
                ShadowOutcome::Failed {
                    version: task_version,
                    error,
                }
            }
            Ok(Ok(Err(e))) => {
                METRICS.inc_shadow_failed();
                obs::emit_shadow_failed(&request_id, &task_version, &e);
                ShadowOutcome::Failed {
                    version: task_version,
                    error: e.to_string(),
                }
            }
            Ok(Ok(Ok(shadow))) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let divergence = tokio::time::timeout_at(started + budget, primary)
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .and_then(|p| p.mean_abs_diff(&shadow));
                METRICS.inc_shadow_completed();
                obs::emit_shadow_completed(
                    &request_id,
                    &task_version,
                    divergence.unwrap_or(f64::NAN),
                    elapsed_ms,
                );
                ShadowOutcome::Completed {
                    version: task_version,
                    divergence,
                    elapsed_ms,
                }
            }
        }
    });

    ShadowHandle { version, task }
}
