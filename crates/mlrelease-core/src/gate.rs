//! Evaluation gate.
//!
//! Checks an [`EvaluationReport`] against a [`ThresholdPolicy`] to produce a
//! [`GateVerdict`]. The policy is an opaque predicate over the metric
//! mapping; [`MetricRuleSet`] is the declarative policy used by default.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use mlrelease_state::EvaluationReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metric name to value.
pub type Metrics = BTreeMap<String, f64>;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Threshold policy applied to an evaluation's metrics.
pub trait ThresholdPolicy: Send + Sync {
    /// `Err(reason)` when the metrics breach the policy.
    fn check(&self, metrics: &Metrics) -> Result<(), String>;

    /// Machine-readable summary of the thresholds, for decision context.
    fn describe(&self) -> Value {
        Value::Null
    }
}

/// A single metric bound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricRule {
    /// `metric >= min`
    AtLeast { metric: String, min: f64 },
    /// `metric <= max`
    AtMost { metric: String, max: f64 },
}

impl MetricRule {
    pub fn at_least(metric: impl Into<String>, min: f64) -> Self {
        MetricRule::AtLeast {
            metric: metric.into(),
            min,
        }
    }

    pub fn at_most(metric: impl Into<String>, max: f64) -> Self {
        MetricRule::AtMost {
            metric: metric.into(),
            max,
        }
    }

    fn metric(&self) -> &str {
        match self {
            MetricRule::AtLeast { metric, .. } | MetricRule::AtMost { metric, .. } => metric,
        }
    }

    fn check(&self, metrics: &Metrics) -> Option<String> {
        let name = self.metric();
        let value = match metrics.get(name) {
            Some(v) if v.is_finite() => *v,
            Some(v) => return Some(format!("{name} is not a finite number ({v})")),
            None => return Some(format!("{name} missing from evaluation report")),
        };

        match self {
            MetricRule::AtLeast { min, .. } if value < *min => {
                Some(format!("{name} {value:.4} < required {min:.4}"))
            }
            MetricRule::AtMost { max, .. } if value > *max => {
                Some(format!("{name} {value:.4} > allowed {max:.4}"))
            }
            _ => None,
        }
    }
}

/// A set of metric rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRuleSet {
    pub rules: Vec<MetricRule>,
    /// Stop at the first breached rule.
    pub fail_fast: bool,
}

impl MetricRuleSet {
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            fail_fast: false,
        }
    }

    /// ROC AUC of at least 0.95.
    pub fn standard() -> Self {
        Self::empty().with_rule(MetricRule::at_least("eval_roc_auc", 0.95))
    }

    pub fn with_rule(mut self, rule: MetricRule) -> Self {
        self.rules.push(rule);
        self
    }
}

impl Default for MetricRuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl ThresholdPolicy for MetricRuleSet {
    fn check(&self, metrics: &Metrics) -> Result<(), String> {
        let mut breaches = Vec::new();
        for rule in &self.rules {
            if let Some(reason) = rule.check(metrics) {
                breaches.push(reason);
                if self.fail_fast {
                    break;
                }
            }
        }
        if breaches.is_empty() {
            Ok(())
        } else {
            Err(breaches.join("; "))
        }
    }

    fn describe(&self) -> Value {
        serde_json::to_value(&self.rules).unwrap_or(Value::Null)
    }
}

/// Wraps a closure as a [`ThresholdPolicy`].
pub struct PredicatePolicy<F> {
    name: String,
    predicate: F,
}

impl<F> PredicatePolicy<F>
where
    F: Fn(&Metrics) -> Result<(), String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> ThresholdPolicy for PredicatePolicy<F>
where
    F: Fn(&Metrics) -> Result<(), String> + Send + Sync,
{
    fn check(&self, metrics: &Metrics) -> Result<(), String> {
        (self.predicate)(metrics)
    }

    fn describe(&self) -> Value {
        Value::String(self.name.clone())
    }
}

impl<F> fmt::Debug for PredicatePolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicatePolicy")
            .field("name", &self.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The outcome of gating one evaluation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    /// Why the gate failed (empty when passed).
    pub reasons: Vec<String>,
}

impl GateVerdict {
    fn pass() -> Self {
        Self {
            passed: true,
            reasons: Vec::new(),
        }
    }

    fn fail(reasons: Vec<String>) -> Self {
        Self {
            passed: false,
            reasons,
        }
    }

    /// Human-readable failure reason.
    pub fn reason(&self) -> Option<String> {
        if self.passed {
            None
        } else {
            Some(self.reasons.join("; "))
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Applies a threshold policy to evaluation reports.
#[derive(Clone)]
pub struct GateEvaluator {
    policy: Arc<dyn ThresholdPolicy>,
}

impl GateEvaluator {
    pub fn new(policy: Arc<dyn ThresholdPolicy>) -> Self {
        Self { policy }
    }

    pub fn thresholds(&self) -> Value {
        self.policy.describe()
    }

    /// Gate a report. A missing report fails the gate.
    pub fn evaluate(&self, report: Option<&EvaluationReport>) -> GateVerdict {
        let report = match report {
            Some(r) => r,
            None => return GateVerdict::fail(vec!["no evaluation report recorded".to_string()]),
        };

        let mut reasons = Vec::new();
        if !report.gate_passed {
            reasons.push("evaluation report marked the gate as failed".to_string());
        }
        if let Err(reason) = self.policy.check(&report.metrics) {
            reasons.push(reason);
        }

        if reasons.is_empty() {
            GateVerdict::pass()
        } else {
            GateVerdict::fail(reasons)
        }
    }
}

impl Default for GateEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(MetricRuleSet::standard()))
    }
}

impl fmt::Debug for GateEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateEvaluator")
            .field("thresholds", &self.policy.describe())
            .finish()
    }
}
