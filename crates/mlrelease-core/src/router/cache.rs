//! Short-lived alias resolution cache.
//!
//! Router reads may lag an alias mutation by at most the TTL. Only
//! successful lookups are cached, including "alias not set".

use std::collections::HashMap;
use std::time::Duration;

use mlrelease_state::{Alias, VersionId};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: Option<VersionId>,
    fetched_at: Instant,
}

#[derive(Debug)]
pub struct AliasCache {
    ttl: Duration,
    entries: RwLock<HashMap<Alias, Entry>>,
}

impl AliasCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// `Some(resolution)` when a fresh entry exists.
    pub async fn get(&self, alias: Alias) -> Option<Option<VersionId>> {
        if !self.is_enabled() {
            return None;
        }
        let entries = self.entries.read().await;
        entries
            .get(&alias)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub async fn put(&self, alias: Alias, value: Option<VersionId>) {
        if !self.is_enabled() {
            return;
        }
        self.entries.write().await.insert(
            alias,
            Entry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
    }
}
