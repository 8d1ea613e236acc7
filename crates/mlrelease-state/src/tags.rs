//! Tag keys and values recorded on model versions.
//!
//! Registration writes the lineage tags; promotion and rollback add the
//! release bookkeeping tags.

pub const SOURCE_RUN_ID: &str = "source_run_id";
pub const DATASET_FINGERPRINT: &str = "dataset_fingerprint";
pub const GIT_SHA: &str = "git_sha";
pub const CONFIG_HASH: &str = "config_hash";
pub const TRAINING_RUN_ID: &str = "training_run_id";

pub const GATE: &str = "gate";
pub const RELEASE_STATUS: &str = "release_status";
pub const PREVIOUS_PROD_VERSION: &str = "previous_prod_version";
pub const PROMOTED_FROM_ALIAS: &str = "promoted_from_alias";

pub const GATE_PASSED: &str = "passed";
pub const GATE_FAILED: &str = "failed";

pub const STATUS_CANDIDATE: &str = "candidate";
pub const STATUS_PROD: &str = "prod";
pub const STATUS_CHAMPION: &str = "champion";
pub const STATUS_PREVIOUS_PROD: &str = "previous_prod";

/// Lineage tags every version must carry before it can be promoted.
pub const REQUIRED_LINEAGE: [&str; 4] =
    [DATASET_FINGERPRINT, GIT_SHA, CONFIG_HASH, TRAINING_RUN_ID];
