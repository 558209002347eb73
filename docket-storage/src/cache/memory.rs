//! In-memory cache backend.

use std::collections::HashMap;

use async_trait::async_trait;
use docket_core::{AnalysisKey, CacheEntry, DocketResult, Timestamp};
use tokio::sync::RwLock;

use super::traits::CacheBackend;

/// HashMap-backed cache for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<AnalysisKey, CacheEntry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn load(&self, key: &AnalysisKey) -> DocketResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, entry: &CacheEntry) -> DocketResult<()> {
        self.entries
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &AnalysisKey) -> DocketResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn record_access(
        &self,
        key: &AnalysisKey,
        at: Timestamp,
    ) -> DocketResult<Option<CacheEntry>> {
        let mut entries = self.entries.write().await;
        Ok(entries.get_mut(key).map(|entry| {
            entry.access_count += 1;
            entry.last_accessed_at = Some(at);
            entry.clone()
        }))
    }

    async fn purge_expired(&self, now: Timestamp) -> DocketResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    async fn entry_count(&self) -> DocketResult<u64> {
        Ok(self.entries.read().await.len() as u64)
    }
}
