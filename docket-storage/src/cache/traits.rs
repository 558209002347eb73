//! Cache backend trait and statistics.
//!
//! This module defines the trait that must be implemented by cache backends.
//! Backends are dumb keyed stores; freshness and hit accounting live in
//! [`CacheStore`](super::CacheStore).

use async_trait::async_trait;
use docket_core::{AnalysisKey, CacheEntry, DocketResult, Timestamp};
use serde::{Deserialize, Serialize};

/// Cache backend trait for pluggable cache implementations.
///
/// This trait abstracts over different cache backends (e.g., LMDB, Postgres,
/// in-memory). Implementations should be thread-safe and support concurrent
/// access.
///
/// # Key Format
///
/// Entries are keyed by the 64-character hex analysis key. One entry per key.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get an entry by key, regardless of its expiry.
    async fn load(&self, key: &AnalysisKey) -> DocketResult<Option<CacheEntry>>;

    /// Insert an entry, replacing any existing entry for the same key.
    async fn store(&self, entry: &CacheEntry) -> DocketResult<()>;

    /// Remove an entry. Returns whether an entry existed.
    async fn remove(&self, key: &AnalysisKey) -> DocketResult<bool>;

    /// Increment the access counter and stamp the access time.
    ///
    /// Returns the updated entry, or `None` if the key is absent.
    async fn record_access(
        &self,
        key: &AnalysisKey,
        at: Timestamp,
    ) -> DocketResult<Option<CacheEntry>>;

    /// Remove every entry whose `expires_at` is before `now`.
    async fn purge_expired(&self, now: Timestamp) -> DocketResult<u64>;

    /// Number of entries currently stored, expired or not.
    async fn entry_count(&self) -> DocketResult<u64>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (absent, expired or superseded).
    pub misses: u64,
    /// Number of entries removed because case activity superseded them
    /// or a caller invalidated them.
    pub invalidations: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
