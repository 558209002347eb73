//! Analysis cache with activity-aware freshness.
//!
//! A cached result is served only when it passes two independent checks:
//!
//! 1. The entry's TTL has not elapsed.
//! 2. No case activity newer than the entry's activity snapshot exists.
//!
//! An entry failing either check is removed on the spot and reported as a
//! miss, so the caller falls through to a fresh computation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docket_core::{AnalysisKey, CacheEntry, CaseId, DocketResult, Timestamp, VersionId};

use super::traits::{CacheBackend, CacheStats};
use crate::activity::ActivityOracle;

/// Why a lookup did not produce a usable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// No entry stored under the key.
    Absent,
    /// The entry outlived its TTL.
    Expired,
    /// The case saw activity after the entry was created.
    Superseded,
    /// The entry was written for a different case.
    CaseMismatch,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::Absent => "absent",
            MissReason::Expired => "expired",
            MissReason::Superseded => "superseded",
            MissReason::CaseMismatch => "case_mismatch",
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_hit(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Miss(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

/// Analysis cache front end.
///
/// Wraps a [`CacheBackend`] with the freshness contract and hit accounting.
/// Cheap to share behind an `Arc`.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    oracle: Arc<dyn ActivityOracle>,
    counters: Counters,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, oracle: Arc<dyn ActivityOracle>) -> Self {
        Self {
            backend,
            oracle,
            counters: Counters::default(),
        }
    }

    /// Look up a key, enforcing TTL and activity freshness.
    ///
    /// On a hit the entry's access counter is bumped. Stale entries are
    /// removed before the miss is returned.
    pub async fn get(&self, key: &AnalysisKey) -> DocketResult<CacheLookup> {
        self.lookup(key, None).await
    }

    /// Look up a key on behalf of `case_id`, judging freshness against
    /// `latest_activity`, which the caller has already read for that case.
    ///
    /// The activity oracle is not consulted, so any error returned comes
    /// from the backend. An entry written for another case is a miss and is
    /// left in place.
    pub async fn get_for_case(
        &self,
        key: &AnalysisKey,
        case_id: CaseId,
        latest_activity: Option<Timestamp>,
    ) -> DocketResult<CacheLookup> {
        self.lookup(key, Some((case_id, latest_activity))).await
    }

    async fn lookup(
        &self,
        key: &AnalysisKey,
        known: Option<(CaseId, Option<Timestamp>)>,
    ) -> DocketResult<CacheLookup> {
        let Some(entry) = self.backend.load(key).await? else {
            return Ok(self.miss(MissReason::Absent));
        };

        if let Some((case_id, _)) = known {
            if entry.case_id != case_id {
                tracing::warn!(
                    key = %key,
                    entry_case_id = %entry.case_id,
                    case_id = %case_id,
                    "Cache entry belongs to another case"
                );
                return Ok(self.miss(MissReason::CaseMismatch));
            }
        }

        let now = Utc::now();
        if entry.is_expired(now) {
            self.drop_stale(key, MissReason::Expired).await?;
            return Ok(self.miss(MissReason::Expired));
        }

        let latest = match known {
            Some((_, latest)) => latest,
            None => self.oracle.last_activity_for(entry.case_id).await?,
        };
        if entry.is_superseded_by(latest) {
            self.drop_stale(key, MissReason::Superseded).await?;
            return Ok(self.miss(MissReason::Superseded));
        }

        // Entry may have been removed concurrently between load and touch.
        let touched = self.backend.record_access(key, now).await?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Ok(CacheLookup::Hit(touched.unwrap_or(entry)))
    }

    /// Store a result pointer. Replaces an existing entry for the same key.
    pub async fn put(
        &self,
        key: &AnalysisKey,
        case_id: CaseId,
        result_ref: VersionId,
        ttl: Duration,
        activity_snapshot: Option<Timestamp>,
    ) -> DocketResult<CacheEntry> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let entry = CacheEntry {
            key: key.clone(),
            case_id,
            result_ref,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC),
            access_count: 0,
            last_accessed_at: None,
            activity_at_creation: activity_snapshot,
        };
        self.backend.store(&entry).await?;
        tracing::debug!(
            key = %key,
            case_id = %case_id,
            version_id = %result_ref,
            expires_at = %entry.expires_at,
            "Cached analysis result"
        );
        Ok(entry)
    }

    /// Remove an entry. Returns whether one existed.
    pub async fn invalidate(&self, key: &AnalysisKey) -> DocketResult<bool> {
        let removed = self.backend.remove(key).await?;
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    /// Record an access without a freshness check.
    pub async fn touch(&self, key: &AnalysisKey) -> DocketResult<Option<CacheEntry>> {
        self.backend.record_access(key, Utc::now()).await
    }

    /// Remove all entries past their TTL.
    pub async fn purge_expired(&self) -> DocketResult<u64> {
        self.backend.purge_expired(Utc::now()).await
    }

    /// Snapshot of hit accounting plus the backend's current entry count.
    pub async fn stats(&self) -> DocketResult<CacheStats> {
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entry_count: self.backend.entry_count().await?,
        })
    }

    fn miss(&self, reason: MissReason) -> CacheLookup {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Miss(reason)
    }

    async fn drop_stale(&self, key: &AnalysisKey, reason: MissReason) -> DocketResult<()> {
        if self.backend.remove(key).await? {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, reason = reason.as_str(), "Removed stale cache entry");
        }
        Ok(())
    }
}
