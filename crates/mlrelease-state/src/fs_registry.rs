//! JSON-file-backed alias registry.
//!
//! The whole registry lives in one JSON document. Every operation loads the
//! document, applies the change and, when something changed, writes it back
//! atomically (temp file in the same directory, then rename). Operations are
//! serialised within one process by an async lock.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::state::RegistryState;
use crate::storage_traits::*;

/// Filesystem-backed registry storing all state in a single JSON file.
pub struct FsAliasRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FsAliasRegistry {
    /// Open (or lazily create) the registry file at `path`. Creates parent
    /// directories if needed.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<RegistryState> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryState::default()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn persist(&self, state: &RegistryState) -> StorageResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let bytes = serde_json::to_vec_pretty(state)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), "registry state persisted");
        Ok(())
    }

    async fn read<T>(
        &self,
        f: impl FnOnce(&RegistryState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let _guard = self.lock.lock().await;
        let state = self.load()?;
        f(&state)
    }

    async fn write<T>(
        &self,
        f: impl FnOnce(&mut RegistryState) -> StorageResult<(T, bool)>,
    ) -> StorageResult<T> {
        let _guard = self.lock.lock().await;
        let mut state = self.load()?;
        let (value, changed) = f(&mut state)?;
        if changed {
            self.persist(&state)?;
        }
        Ok(value)
    }
}

#[async_trait]
impl AliasRegistry for FsAliasRegistry {
    async fn register_version(&self, version: ModelVersion) -> StorageResult<()> {
        self.write(|s| s.register(version).map(|()| ((), true)))
            .await
    }

    async fn get_version(&self, model: &str, version: &VersionId) -> StorageResult<ModelVersion> {
        self.read(|s| s.version(model, version)).await
    }

    async fn list_versions(&self, model: &str) -> StorageResult<Vec<ModelVersion>> {
        self.read(|s| Ok(s.versions(model))).await
    }

    async fn resolve(&self, model: &str, alias: Alias) -> StorageResult<Option<VersionId>> {
        self.read(|s| Ok(s.resolve(model, alias))).await
    }

    async fn snapshot(&self, model: &str) -> StorageResult<AliasSnapshot> {
        self.read(|s| Ok(s.snapshot(model))).await
    }

    async fn compare_and_swap(&self, model: &str, swap: AliasSwap) -> StorageResult<SwapOutcome> {
        self.write(|s| {
            let outcome = s.compare_and_swap(model, swap)?;
            let changed = outcome.is_applied();
            Ok((outcome, changed))
        })
        .await
    }
}

#[async_trait]
impl EvaluationStore for FsAliasRegistry {
    async fn put_report(
        &self,
        model: &str,
        version: &VersionId,
        report: EvaluationReport,
    ) -> StorageResult<()> {
        self.write(|s| s.put_report(model, version, report).map(|()| ((), true)))
            .await
    }

    async fn get_report(
        &self,
        model: &str,
        version: &VersionId,
    ) -> StorageResult<Option<EvaluationReport>> {
        self.read(|s| Ok(s.report(model, version))).await
    }
}
