//! Deterministic canary bucketing.
//!
//! A request's percentile bucket is `sha256(seed) mod 100`, reading the
//! digest as a big-endian integer. The payload seed is its canonical JSON
//! encoding (object keys sorted, no insignificant whitespace), so the
//! bucket is stable across requests, processes and restarts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::backend::InferenceRequest;
use crate::settings::BucketSeed;

/// Where a request's bucket came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    Payload,
    RequestId,
}

/// A request's canary bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAssignment {
    /// Percentile in `[0, 100)`.
    pub bucket: u8,
    pub seed: SeedSource,
}

/// `sha256(bytes)` as an integer, reduced modulo 100.
pub fn bucket_of(bytes: &[u8]) -> u8 {
    let digest = Sha256::digest(bytes);
    let r = digest
        .iter()
        .fold(0u32, |acc, byte| (acc * 256 + u32::from(*byte)) % 100);
    r as u8
}

/// Canonical JSON bytes for a payload.
pub fn canonical_bytes(payload: &Value) -> Vec<u8> {
    // serde_json only fails on non-string map keys, which `Value` cannot hold.
    serde_json::to_vec(&sorted(payload)).unwrap_or_default()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Assign a request to a bucket according to the configured seed.
pub fn assign(seed: BucketSeed, request: &InferenceRequest) -> BucketAssignment {
    match (seed, request.client_request_id()) {
        (BucketSeed::RequestId, Some(id)) => BucketAssignment {
            bucket: bucket_of(id.as_bytes()),
            seed: SeedSource::RequestId,
        },
        _ => BucketAssignment {
            bucket: bucket_of(&canonical_bytes(&request.payload)),
            seed: SeedSource::Payload,
        },
    }
}
