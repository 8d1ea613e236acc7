//! In-memory alias registry
//!
//! `MemoryAliasRegistry` satisfies both storage traits without any external
//! dependencies. It backs embedded deployments and every test in the
//! workspace.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::state::RegistryState;
use crate::storage_traits::*;

/// In-memory registry backed by a single lock around the registry state.
#[derive(Debug, Default)]
pub struct MemoryAliasRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryAliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AliasRegistry for MemoryAliasRegistry {
    async fn register_version(&self, version: ModelVersion) -> StorageResult<()> {
        debug!(model = %version.model_name, version = %version.version, "registering version");
        self.state.lock().await.register(version)
    }

    async fn get_version(&self, model: &str, version: &VersionId) -> StorageResult<ModelVersion> {
        self.state.lock().await.version(model, version)
    }

    async fn list_versions(&self, model: &str) -> StorageResult<Vec<ModelVersion>> {
        Ok(self.state.lock().await.versions(model))
    }

    async fn resolve(&self, model: &str, alias: Alias) -> StorageResult<Option<VersionId>> {
        Ok(self.state.lock().await.resolve(model, alias))
    }

    async fn snapshot(&self, model: &str) -> StorageResult<AliasSnapshot> {
        Ok(self.state.lock().await.snapshot(model))
    }

    async fn compare_and_swap(&self, model: &str, swap: AliasSwap) -> StorageResult<SwapOutcome> {
        self.state.lock().await.compare_and_swap(model, swap)
    }
}

#[async_trait]
impl EvaluationStore for MemoryAliasRegistry {
    async fn put_report(
        &self,
        model: &str,
        version: &VersionId,
        report: EvaluationReport,
    ) -> StorageResult<()> {
        self.state.lock().await.put_report(model, version, report)
    }

    async fn get_report(
        &self,
        model: &str,
        version: &VersionId,
    ) -> StorageResult<Option<EvaluationReport>> {
        Ok(self.state.lock().await.report(model, version))
    }
}
