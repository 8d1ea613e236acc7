//! Registry state shared by the in-memory and file-backed registries.
//!
//! Every operation here is synchronous and runs while the owning registry
//! holds its lock, which makes each call one critical section.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{
    Alias, AliasSnapshot, AliasSwap, EvaluationReport, ModelVersion, StorageResult, SwapOutcome,
    VersionId,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RegistryState {
    #[serde(default)]
    models: BTreeMap<String, ModelEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    versions: BTreeMap<VersionId, ModelVersion>,
    /// Keyed by `Alias::slot().as_str()`.
    #[serde(default)]
    pointers: BTreeMap<String, VersionId>,
    #[serde(default)]
    reports: BTreeMap<VersionId, EvaluationReport>,
    #[serde(default)]
    revision: u64,
}

fn not_found(model: &str, version: &VersionId) -> StorageError {
    StorageError::VersionNotFound {
        model: model.to_string(),
        version: version.to_string(),
    }
}

impl RegistryState {
    pub(crate) fn register(&mut self, version: ModelVersion) -> StorageResult<()> {
        if version.model_name.trim().is_empty() {
            return Err(StorageError::InvalidVersion(
                "model_name is empty".to_string(),
            ));
        }
        if version.version.as_str().trim().is_empty() {
            return Err(StorageError::InvalidVersion("version is empty".to_string()));
        }

        let entry = self.models.entry(version.model_name.clone()).or_default();
        if entry.versions.contains_key(&version.version) {
            return Err(StorageError::VersionExists {
                model: version.model_name.clone(),
                version: version.version.to_string(),
            });
        }
        entry.versions.insert(version.version.clone(), version);
        Ok(())
    }

    pub(crate) fn version(&self, model: &str, version: &VersionId) -> StorageResult<ModelVersion> {
        self.models
            .get(model)
            .and_then(|e| e.versions.get(version))
            .cloned()
            .ok_or_else(|| not_found(model, version))
    }

    pub(crate) fn versions(&self, model: &str) -> Vec<ModelVersion> {
        self.models
            .get(model)
            .map(|e| e.versions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn resolve(&self, model: &str, alias: Alias) -> Option<VersionId> {
        self.models
            .get(model)
            .and_then(|e| e.pointers.get(alias.slot().as_str()))
            .cloned()
    }

    pub(crate) fn snapshot(&self, model: &str) -> AliasSnapshot {
        let prod = self.resolve(model, Alias::Prod);
        AliasSnapshot {
            model_name: model.to_string(),
            candidate: self.resolve(model, Alias::Candidate),
            champion: prod.clone(),
            prod,
            revision: self.models.get(model).map(|e| e.revision).unwrap_or(0),
        }
    }

    pub(crate) fn compare_and_swap(
        &mut self,
        model: &str,
        swap: AliasSwap,
    ) -> StorageResult<SwapOutcome> {
        let entry = self
            .models
            .get_mut(model)
            .ok_or_else(|| not_found(model, &swap.target))?;

        let slot = swap.alias.slot().as_str();
        let actual = entry.pointers.get(slot).cloned();
        if actual != swap.expected {
            return Ok(SwapOutcome::Conflict {
                expected: swap.expected,
                actual,
            });
        }

        // Validate everything before touching anything.
        if !entry.versions.contains_key(&swap.target) {
            return Err(not_found(model, &swap.target));
        }
        if let Some(missing) = swap
            .tag_writes
            .iter()
            .find(|w| !entry.versions.contains_key(&w.version))
        {
            return Err(not_found(model, &missing.version));
        }

        for write in swap.tag_writes {
            if let Some(mv) = entry.versions.get_mut(&write.version) {
                mv.tags.insert(write.key, write.value);
            }
        }
        entry.pointers.insert(slot.to_string(), swap.target);
        entry.revision += 1;

        Ok(SwapOutcome::Applied {
            previous: actual,
            revision: entry.revision,
        })
    }

    pub(crate) fn put_report(
        &mut self,
        model: &str,
        version: &VersionId,
        report: EvaluationReport,
    ) -> StorageResult<()> {
        let entry = self
            .models
            .get_mut(model)
            .filter(|e| e.versions.contains_key(version))
            .ok_or_else(|| not_found(model, version))?;
        entry.reports.insert(version.clone(), report);
        Ok(())
    }

    pub(crate) fn report(&self, model: &str, version: &VersionId) -> Option<EvaluationReport> {
        self.models
            .get(model)
            .and_then(|e| e.reports.get(version))
            .cloned()
    }
}
