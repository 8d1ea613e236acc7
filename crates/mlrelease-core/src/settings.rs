//! Serving configuration.
//!
//! Mirrors the deployment environment variables. Use [`ServingSettings::default`]
//! and the `with_*` setters, or [`ServingSettings::from_env`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL_NAME: &str = "breast_cancer_clf";
pub const DEFAULT_CANARY_PCT: u8 = 10;
pub const DEFAULT_ALIAS_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_SHADOW_TIMEOUT: Duration = Duration::from_millis(250);

/// Invalid serving configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("canary percentage must be an integer in [0, 100], got {0}")]
    CanaryOutOfRange(String),

    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Canary percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct CanaryPct(u8);

impl CanaryPct {
    pub const ZERO: CanaryPct = CanaryPct(0);
    pub const ALL: CanaryPct = CanaryPct(100);

    pub fn get(self) -> u8 {
        self.0
    }

    /// Whether a request in percentile bucket `bucket` goes to the candidate.
    pub fn admits(self, bucket: u8) -> bool {
        bucket < self.0
    }
}

impl Default for CanaryPct {
    fn default() -> Self {
        CanaryPct(DEFAULT_CANARY_PCT)
    }
}

impl TryFrom<i64> for CanaryPct {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (0..=100).contains(&value) {
            Ok(CanaryPct(value as u8))
        } else {
            Err(ConfigError::CanaryOutOfRange(value.to_string()))
        }
    }
}

impl From<CanaryPct> for i64 {
    fn from(p: CanaryPct) -> i64 {
        i64::from(p.0)
    }
}

impl FromStr for CanaryPct {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let value: i64 = raw
            .parse()
            .map_err(|_| ConfigError::CanaryOutOfRange(raw.to_string()))?;
        CanaryPct::try_from(value)
    }
}

impl fmt::Display for CanaryPct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the canary bucket is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketSeed {
    /// Canonical request payload bytes.
    #[default]
    Payload,
    /// Client request id, falling back to the payload when absent.
    RequestId,
}

impl FromStr for BucketSeed {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "payload" => Ok(BucketSeed::Payload),
            "request_id" | "request-id" => Ok(BucketSeed::RequestId),
            other => Err(ConfigError::Invalid {
                var: "CANARY_BUCKET_SEED",
                value: other.to_string(),
                reason: "expected 'payload' or 'request_id'".to_string(),
            }),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingSettings {
    pub model_name: String,
    pub canary_pct: CanaryPct,
    /// Zero disables the alias cache.
    pub alias_cache_ttl: Duration,
    pub shadow_timeout: Duration,
    pub bucket_seed: BucketSeed,
}

impl Default for ServingSettings {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            canary_pct: CanaryPct::default(),
            alias_cache_ttl: DEFAULT_ALIAS_CACHE_TTL,
            shadow_timeout: DEFAULT_SHADOW_TIMEOUT,
            bucket_seed: BucketSeed::default(),
        }
    }
}

impl ServingSettings {
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_canary_pct(mut self, pct: CanaryPct) -> Self {
        self.canary_pct = pct;
        self
    }

    pub fn with_alias_cache_ttl(mut self, ttl: Duration) -> Self {
        self.alias_cache_ttl = ttl;
        self
    }

    pub fn with_shadow_timeout(mut self, timeout: Duration) -> Self {
        self.shadow_timeout = timeout;
        self
    }

    pub fn with_bucket_seed(mut self, seed: BucketSeed) -> Self {
        self.bucket_seed = seed;
        self
    }

    /// Read settings from the process environment.
    ///
    /// - `MODEL_NAME`
    /// - `CANARY_PCT`
    /// - `MODEL_CACHE_TTL_SEC`
    /// - `SHADOW_TIMEOUT_MS`
    /// - `CANARY_BUCKET_SEED`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source. Unset or blank
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(name) = get("MODEL_NAME") {
            settings.model_name = name.trim().to_string();
        }
        if let Some(raw) = get("CANARY_PCT") {
            settings.canary_pct = raw.parse()?;
        }
        if let Some(raw) = get("MODEL_CACHE_TTL_SEC") {
            settings.alias_cache_ttl = parse_ttl(&raw)?;
        }
        if let Some(raw) = get("SHADOW_TIMEOUT_MS") {
            settings.shadow_timeout = parse_shadow_timeout(&raw)?;
        }
        if let Some(raw) = get("CANARY_BUCKET_SEED") {
            settings.bucket_seed = raw.parse()?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "MODEL_NAME",
                value: self.model_name.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.shadow_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "SHADOW_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_ttl(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        var: "MODEL_CACHE_TTL_SEC",
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let secs: f64 = raw.trim().parse().map_err(|_| invalid("not a number"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| invalid("must be a non-negative finite number"))
}

fn parse_shadow_timeout(raw: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var: "SHADOW_TIMEOUT_MS",
        value: raw.to_string(),
        reason: "expected a positive integer of milliseconds".to_string(),
    })?;
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_deployment() {
        let s = ServingSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s.model_name, "breast_cancer_clf");
        assert_eq!(s.canary_pct.get(), 10);
        assert_eq!(s.alias_cache_ttl, Duration::from_secs(60));
        assert_eq!(s.shadow_timeout, Duration::from_millis(250));
        assert_eq!(s.bucket_seed, BucketSeed::Payload);
    }

    #[test]
    fn env_overrides_apply() {
        let s = ServingSettings::from_lookup(lookup(&[
            ("MODEL_NAME", "fraud"),
            ("CANARY_PCT", "25"),
            ("MODEL_CACHE_TTL_SEC", "0.5"),
            ("SHADOW_TIMEOUT_MS", "40"),
            ("CANARY_BUCKET_SEED", "request_id"),
        ]))
        .unwrap();
        assert_eq!(s.model_name, "fraud");
        assert_eq!(s.canary_pct.get(), 25);
        assert_eq!(s.alias_cache_ttl, Duration::from_millis(500));
        assert_eq!(s.shadow_timeout, Duration::from_millis(40));
        assert_eq!(s.bucket_seed, BucketSeed::RequestId);
    }

    #[test]
    fn canary_out_of_range_is_rejected_not_clamped() {
        for bad in ["101", "-1", "ten", "12.5"] {
            let err = ServingSettings::from_lookup(lookup(&[("CANARY_PCT", bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::CanaryOutOfRange(_)), "{bad}");
        }
        assert!(CanaryPct::try_from(0_i64).is_ok());
        assert!(CanaryPct::try_from(100_i64).is_ok());
    }

    #[test]
    fn zero_ttl_is_allowed_negative_is_not() {
        let s = ServingSettings::from_lookup(lookup(&[("MODEL_CACHE_TTL_SEC", "0")])).unwrap();
        assert!(s.alias_cache_ttl.is_zero());
        let err =
            ServingSettings::from_lookup(lookup(&[("MODEL_CACHE_TTL_SEC", "-3")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "MODEL_CACHE_TTL_SEC", .. }));
    }

    #[test]
    fn zero_shadow_timeout_is_invalid() {
        let err = ServingSettings::from_lookup(lookup(&[("SHADOW_TIMEOUT_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SHADOW_TIMEOUT_MS", .. }));
    }

    #[test]
    fn canary_admits_strictly_below_pct() {
        let pct = CanaryPct::try_from(10_i64).unwrap();
        assert!(pct.admits(9));
        assert!(!pct.admits(10));
        assert!(!CanaryPct::ZERO.admits(0));
        assert!(CanaryPct::ALL.admits(99));
    }

    #[test]
    fn canary_serde_validates() {
        let pct: CanaryPct = serde_json::from_str("42").unwrap();
        assert_eq!(pct.get(), 42);
        assert!(serde_json::from_str::<CanaryPct>("300").is_err());
    }
}
