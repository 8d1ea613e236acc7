//! Structured observability hooks for release and routing events.
//!
//! Every event carries an `event = "..."` field so log pipelines can filter
//! on it. Promotion and rollback emit at `info!`; per-request routing events
//! emit at `debug!` except for conditions an operator must see.

use mlrelease_state::VersionId;
use tracing::{debug, info, warn};

/// Release-scoped span for one promotion or rollback. Attach it to the
/// operation's future with [`tracing::Instrument::instrument`].
///
/// ```ignore
/// engine_future.instrument(release_span("promote", "breast_cancer_clf")).await
/// ```
pub fn release_span(operation: &str, model_name: &str) -> tracing::Span {
    tracing::info_span!("mlrelease.release", operation = %operation, model = %model_name)
}

fn opt(v: Option<&VersionId>) -> &str {
    v.map(VersionId::as_str).unwrap_or("-")
}

/// Emit event: a promotion policy was evaluated.
pub fn emit_promotion_decided(
    model_name: &str,
    version: &VersionId,
    allowed: bool,
    dry_run: bool,
    errors: usize,
    warnings: usize,
) {
    info!(
        event = "promotion.decided",
        model = %model_name,
        version = %version,
        allowed = allowed,
        dry_run = dry_run,
        errors = errors,
        warnings = warnings,
    );
}

/// Emit event: prod was swapped to a new version.
pub fn emit_promotion_applied(
    model_name: &str,
    version: &VersionId,
    previous: Option<&VersionId>,
    attempt: u32,
    revision: u64,
) {
    info!(
        event = "promotion.applied",
        model = %model_name,
        version = %version,
        previous = %opt(previous),
        attempt = attempt,
        revision = revision,
    );
}

/// Emit event: a promotion lost the swap race on one attempt.
pub fn emit_promotion_conflict(
    model_name: &str,
    version: &VersionId,
    attempt: u32,
    expected: Option<&VersionId>,
    actual: Option<&VersionId>,
) {
    warn!(
        event = "promotion.conflict",
        model = %model_name,
        version = %version,
        attempt = attempt,
        expected = %opt(expected),
        actual = %opt(actual),
    );
}

/// Emit event: prod was restored to its previous version.
pub fn emit_rollback_applied(model_name: &str, from: &VersionId, to: &VersionId, attempt: u32) {
    info!(
        event = "rollback.applied",
        model = %model_name,
        from = %from,
        to = %to,
        attempt = attempt,
    );
}

/// Emit event: a request was routed.
pub fn emit_route_decided(
    request_id: &str,
    mode: &str,
    version: &VersionId,
    bucket: Option<u8>,
    shadow_target: bool,
) {
    debug!(
        event = "route.decided",
        request_id = %request_id,
        mode = %mode,
        version = %version,
        bucket = ?bucket,
        shadow_target = shadow_target,
    );
}

/// Emit event: a served request finished. Server-side failures log at `warn!`.
pub fn emit_route_served(
    request_id: &str,
    mode: &str,
    status: u16,
    chosen: Option<&str>,
    latency_ms: u64,
) {
    let chosen = chosen.unwrap_or("-");
    if status >= 500 {
        warn!(
            event = "route.served",
            request_id = %request_id,
            mode = %mode,
            status = status,
            chosen = %chosen,
            latency_ms = latency_ms,
        );
    } else {
        debug!(
            event = "route.served",
            request_id = %request_id,
            mode = %mode,
            status = status,
            chosen = %chosen,
            latency_ms = latency_ms,
        );
    }
}

/// Emit event: an alias the mode needs has no target.
pub fn emit_alias_absent(request_id: &str, mode: &str, alias: &str) {
    warn!(
        event = "route.alias_absent",
        request_id = %request_id,
        mode = %mode,
        alias = %alias,
    );
}

/// Emit event: the registry failed while resolving an alias.
pub fn emit_registry_error(request_id: &str, alias: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "route.registry_error",
        request_id = %request_id,
        alias = %alias,
        error = %error,
    );
}

/// Emit event: a shadow inference finished and was compared to primary.
pub fn emit_shadow_completed(
    request_id: &str,
    version: &VersionId,
    divergence: f64,
    elapsed_ms: u64,
) {
    info!(
        event = "shadow.completed",
        request_id = %request_id,
        version = %version,
        divergence = divergence,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: a shadow inference errored or panicked.
pub fn emit_shadow_failed(request_id: &str, version: &VersionId, error: &dyn std::fmt::Display) {
    warn!(
        event = "shadow.failed",
        request_id = %request_id,
        version = %version,
        error = %error,
    );
}

/// Emit event: a shadow inference exceeded its budget and was abandoned.
pub fn emit_shadow_timed_out(request_id: &str, version: &VersionId, budget_ms: u64) {
    warn!(
        event = "shadow.timed_out",
        request_id = %request_id,
        version = %version,
        budget_ms = budget_ms,
    );
}
