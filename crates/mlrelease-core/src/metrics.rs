//! Global atomic counters for release and routing observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on a daemon tick or at shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::router::ServingMode;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free atomic counters for release and routing events.
pub struct Metrics {
    requests_routed: AtomicU64,
    routed_prod: AtomicU64,
    routed_candidate: AtomicU64,
    routed_canary: AtomicU64,
    routed_shadow: AtomicU64,
    canary_candidate_hits: AtomicU64,
    candidate_fallbacks: AtomicU64,
    alias_absent: AtomicU64,
    registry_errors: AtomicU64,
    served_ok: AtomicU64,
    served_bad_request: AtomicU64,
    served_unavailable: AtomicU64,
    served_failed: AtomicU64,
    serve_latency_ms_total: AtomicU64,
    serve_latency_count: AtomicU64,
    shadow_started: AtomicU64,
    shadow_completed: AtomicU64,
    shadow_failed: AtomicU64,
    shadow_timed_out: AtomicU64,
    promotions_applied: AtomicU64,
    promotion_conflicts: AtomicU64,
    rollbacks: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            requests_routed: AtomicU64::new(0),
            routed_prod: AtomicU64::new(0),
            routed_candidate: AtomicU64::new(0),
            routed_canary: AtomicU64::new(0),
            routed_shadow: AtomicU64::new(0),
            canary_candidate_hits: AtomicU64::new(0),
            candidate_fallbacks: AtomicU64::new(0),
            alias_absent: AtomicU64::new(0),
            registry_errors: AtomicU64::new(0),
            served_ok: AtomicU64::new(0),
            served_bad_request: AtomicU64::new(0),
            served_unavailable: AtomicU64::new(0),
            served_failed: AtomicU64::new(0),
            serve_latency_ms_total: AtomicU64::new(0),
            serve_latency_count: AtomicU64::new(0),
            shadow_started: AtomicU64::new(0),
            shadow_completed: AtomicU64::new(0),
            shadow_failed: AtomicU64::new(0),
            shadow_timed_out: AtomicU64::new(0),
            promotions_applied: AtomicU64::new(0),
            promotion_conflicts: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// A request was routed in `mode`.
    pub fn inc_routed(&self, mode: ServingMode) {
        bump(&self.requests_routed, "requests_routed");
        match mode {
            ServingMode::Prod => bump(&self.routed_prod, "routed_prod"),
            ServingMode::Candidate => bump(&self.routed_candidate, "routed_candidate"),
            ServingMode::Canary => bump(&self.routed_canary, "routed_canary"),
            ServingMode::Shadow => bump(&self.routed_shadow, "routed_shadow"),
        }
    }

    /// A canary request landed in the candidate bucket and a candidate existed.
    pub fn inc_canary_candidate_hits(&self) {
        bump(&self.canary_candidate_hits, "canary_candidate_hits");
    }

    /// A canary request landed in the candidate bucket but no candidate existed.
    pub fn inc_candidate_fallbacks(&self) {
        bump(&self.candidate_fallbacks, "candidate_fallbacks");
    }

    /// An alias had no target. Expected for `candidate`, never for `prod`.
    pub fn inc_alias_absent(&self) {
        bump(&self.alias_absent, "alias_absent");
    }

    /// The registry failed to answer.
    pub fn inc_registry_errors(&self) {
        bump(&self.registry_errors, "registry_errors");
    }

    /// A served request finished with `status` after `latency_ms`.
    /// Statuses other than 200, 400 and 503 count as 500.
    pub fn record_served(&self, status: u16, latency_ms: u64) {
        match status {
            200 => bump(&self.served_ok, "served_ok"),
            400 => bump(&self.served_bad_request, "served_bad_request"),
            503 => bump(&self.served_unavailable, "served_unavailable"),
            _ => bump(&self.served_failed, "served_failed"),
        }
        self.serve_latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
        self.serve_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_shadow_started(&self) {
        bump(&self.shadow_started, "shadow_started");
    }

    pub fn inc_shadow_completed(&self) {
        bump(&self.shadow_completed, "shadow_completed");
    }

    pub fn inc_shadow_failed(&self) {
        bump(&self.shadow_failed, "shadow_failed");
    }

    pub fn inc_shadow_timed_out(&self) {
        bump(&self.shadow_timed_out, "shadow_timed_out");
    }

    pub fn inc_promotions_applied(&self) {
        bump(&self.promotions_applied, "promotions_applied");
    }

    pub fn inc_promotion_conflicts(&self) {
        bump(&self.promotion_conflicts, "promotion_conflicts");
    }

    pub fn inc_rollbacks(&self) {
        bump(&self.rollbacks, "rollbacks");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            requests_routed = self.requests_routed(),
            routed_prod = self.routed(ServingMode::Prod),
            routed_candidate = self.routed(ServingMode::Candidate),
            routed_canary = self.routed(ServingMode::Canary),
            routed_shadow = self.routed(ServingMode::Shadow),
            canary_candidate_hits = self.canary_candidate_hits(),
            candidate_fallbacks = self.candidate_fallbacks(),
            alias_absent = self.alias_absent(),
            registry_errors = self.registry_errors(),
            served_200 = self.served(200),
            served_400 = self.served(400),
            served_503 = self.served(503),
            served_500 = self.served(500),
            serve_latency_ms_total = self.serve_latency_ms_total(),
            serve_latency_count = self.serve_latency_count(),
            shadow_started = self.shadow_started(),
            shadow_completed = self.shadow_completed(),
            shadow_failed = self.shadow_failed(),
            shadow_timed_out = self.shadow_timed_out(),
            promotions_applied = self.promotions_applied(),
            promotion_conflicts = self.promotion_conflicts(),
            rollbacks = self.rollbacks(),
        );
    }

    pub fn requests_routed(&self) -> u64 {
        self.requests_routed.load(Ordering::Relaxed)
    }

    pub fn routed(&self, mode: ServingMode) -> u64 {
        let counter = match mode {
            ServingMode::Prod => &self.routed_prod,
            ServingMode::Candidate => &self.routed_candidate,
            ServingMode::Canary => &self.routed_canary,
            ServingMode::Shadow => &self.routed_shadow,
        };
        counter.load(Ordering::Relaxed)
    }

    pub fn canary_candidate_hits(&self) -> u64 {
        self.canary_candidate_hits.load(Ordering::Relaxed)
    }

    pub fn candidate_fallbacks(&self) -> u64 {
        self.candidate_fallbacks.load(Ordering::Relaxed)
    }

    pub fn alias_absent(&self) -> u64 {
        self.alias_absent.load(Ordering::Relaxed)
    }

    pub fn registry_errors(&self) -> u64 {
        self.registry_errors.load(Ordering::Relaxed)
    }

    /// Served requests that finished with `status`.
    pub fn served(&self, status: u16) -> u64 {
        let counter = match status {
            200 => &self.served_ok,
            400 => &self.served_bad_request,
            503 => &self.served_unavailable,
            _ => &self.served_failed,
        };
        counter.load(Ordering::Relaxed)
    }

    pub fn serve_latency_ms_total(&self) -> u64 {
        self.serve_latency_ms_total.load(Ordering::Relaxed)
    }

    pub fn serve_latency_count(&self) -> u64 {
        self.serve_latency_count.load(Ordering::Relaxed)
    }

    pub fn shadow_started(&self) -> u64 {
        self.shadow_started.load(Ordering::Relaxed)
    }

    pub fn shadow_completed(&self) -> u64 {
        self.shadow_completed.load(Ordering::Relaxed)
    }

    pub fn shadow_failed(&self) -> u64 {
        self.shadow_failed.load(Ordering::Relaxed)
    }

    pub fn shadow_timed_out(&self) -> u64 {
        self.shadow_timed_out.load(Ordering::Relaxed)
    }

    pub fn promotions_applied(&self) -> u64 {
        self.promotions_applied.load(Ordering::Relaxed)
    }

    pub fn promotion_conflicts(&self) -> u64 {
        self.promotion_conflicts.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.requests_routed,
            &self.routed_prod,
            &self.routed_candidate,
            &self.routed_canary,
            &self.routed_shadow,
            &self.canary_candidate_hits,
            &self.candidate_fallbacks,
            &self.alias_absent,
            &self.registry_errors,
            &self.served_ok,
            &self.served_bad_request,
            &self.served_unavailable,
            &self.served_failed,
            &self.serve_latency_ms_total,
            &self.serve_latency_count,
            &self.shadow_started,
            &self.shadow_completed,
            &self.shadow_failed,
            &self.shadow_timed_out,
            &self.promotions_applied,
            &self.promotion_conflicts,
            &self.rollbacks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
