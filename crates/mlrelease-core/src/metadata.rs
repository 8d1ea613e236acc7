//! Lineage metadata validation.
//!
//! A version can only be promoted when it records where it came from: the
//! dataset fingerprint, the source commit, the training config hash and the
//! training run. Blank values count as missing.

use mlrelease_state::tags::REQUIRED_LINEAGE;
use mlrelease_state::Tags;

/// Return the required lineage keys absent from `tags`, in canonical order.
///
/// `None` (no tag mapping at all) reports every key as missing.
pub fn missing_required_tags(tags: Option<&Tags>) -> Vec<String> {
    REQUIRED_LINEAGE
        .iter()
        .filter(|key| {
            tags.and_then(|t| t.get(**key))
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .map(|key| key.to_string())
        .collect()
}
