//! Inference backends.
//!
//! The router never runs a model itself; it hands the resolved version and
//! the request to an [`InferenceBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use mlrelease_state::VersionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::InferenceError;

/// A scoring request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Client-supplied request id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub payload: Value,
}

impl InferenceRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            request_id: None,
            payload,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// The request id, ignoring blank values.
    pub fn client_request_id(&self) -> Option<&str> {
        self.request_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Model output: one score per input row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prediction {
    pub scores: Vec<f64>,
}

impl Prediction {
    pub fn new(scores: Vec<f64>) -> Self {
        Self { scores }
    }

    /// Mean absolute difference against another prediction, over the common
    /// prefix. `None` when either side is empty.
    pub fn mean_abs_diff(&self, other: &Prediction) -> Option<f64> {
        let n = self.scores.len().min(other.scores.len());
        if n == 0 {
            return None;
        }
        let total: f64 = self
            .scores
            .iter()
            .zip(&other.scores)
            .map(|(a, b)| (a - b).abs())
            .sum();
        Some(total / n as f64)
    }
}

/// Runs a model version against a request.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(
        &self,
        version: &VersionId,
        request: &InferenceRequest,
    ) -> Result<Prediction, InferenceError>;
}

type InferFuture = BoxFuture<'static, Result<Prediction, InferenceError>>;
type InferFn = dyn Fn(VersionId, InferenceRequest) -> InferFuture + Send + Sync;

/// Adapts an async closure into an [`InferenceBackend`].
#[derive(Clone)]
pub struct FnBackend {
    f: Arc<InferFn>,
}

impl FnBackend {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(VersionId, InferenceRequest) -> InferFuture + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl InferenceBackend for FnBackend {
    async fn infer(
        &self,
        version: &VersionId,
        request: &InferenceRequest,
    ) -> Result<Prediction, InferenceError> {
        (self.f)(version.clone(), request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn mean_abs_diff_over_common_prefix() {
        let a = Prediction::new(vec![0.9, 0.1, 0.5]);
        let b = Prediction::new(vec![0.7, 0.3]);
        let d = a.mean_abs_diff(&b).unwrap();
        assert!((d - 0.2).abs() < 1e-12);
        assert_eq!(a.mean_abs_diff(&Prediction::default()), None);
    }

    #[test]
    fn blank_request_id_is_ignored() {
        let r = InferenceRequest::new(Value::Null).with_request_id("  ");
        assert_eq!(r.client_request_id(), None);
        let r = InferenceRequest::new(Value::Null).with_request_id("abc");
        assert_eq!(r.client_request_id(), Some("abc"));
    }

    #[tokio::test]
    async fn fn_backend_sees_version() {
        let backend = FnBackend::new(|version, _req| {
            async move {
                let score = version.as_str().parse::<f64>().unwrap_or(-1.0);
                Ok(Prediction::new(vec![score]))
            }
            .boxed()
        });
        let out = backend
            .infer(&VersionId::from("3"), &InferenceRequest::new(Value::Null))
            .await
            .unwrap();
        assert_eq!(out.scores, vec![3.0]);
    }
}
