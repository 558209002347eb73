//! Expired cache entry sweeper.
//!
//! Lookups already refuse expired entries; this task only reclaims the
//! space they occupy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docket_core::config::DEFAULT_CACHE_PURGE_INTERVAL_SECS;
use docket_storage::CacheStore;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Metrics for cache purge operations.
#[derive(Debug, Default)]
pub struct CachePurgeMetrics {
    /// Total purge cycles run
    pub purge_cycles: AtomicU64,

    /// Total entries removed since startup
    pub entries_purged: AtomicU64,

    /// Total errors encountered during purges
    pub purge_errors: AtomicU64,
}

impl CachePurgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CachePurgeSnapshot {
        CachePurgeSnapshot {
            purge_cycles: self.purge_cycles.load(Ordering::Relaxed),
            entries_purged: self.entries_purged.load(Ordering::Relaxed),
            purge_errors: self.purge_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of purge metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePurgeSnapshot {
    pub purge_cycles: u64,
    pub entries_purged: u64,
    pub purge_errors: u64,
}

/// Background task that removes expired cache entries every `every`.
///
/// The first sweep runs immediately. Runs until `shutdown_rx` turns `true`
/// or its sender is dropped. A zero `every` falls back to the default
/// purge interval.
pub async fn cache_purge_task(
    cache: Arc<CacheStore>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CachePurgeMetrics> {
    let metrics = Arc::new(CachePurgeMetrics::new());

    let every = if every.is_zero() {
        let fallback = Duration::from_secs(DEFAULT_CACHE_PURGE_INTERVAL_SECS);
        tracing::warn!(
            fallback_secs = fallback.as_secs(),
            "Zero cache purge interval, using default"
        );
        fallback
    } else {
        every
    };

    let mut purge_interval = interval(every);
    purge_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = every.as_secs(), "Cache purge task started");

    if !*shutdown_rx.borrow() {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Cache purge task shutting down");
                        break;
                    }
                }

                _ = purge_interval.tick() => {
                    purge_once(&cache, &metrics).await;
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        purge_cycles = snapshot.purge_cycles,
        entries_purged = snapshot.entries_purged,
        purge_errors = snapshot.purge_errors,
        "Cache purge task completed"
    );

    metrics
}

async fn purge_once(cache: &CacheStore, metrics: &CachePurgeMetrics) {
    metrics.purge_cycles.fetch_add(1, Ordering::Relaxed);
    match cache.purge_expired().await {
        Ok(0) => tracing::trace!("Cache purge found nothing to remove"),
        Ok(removed) => {
            metrics.entries_purged.fetch_add(removed, Ordering::Relaxed);
            tracing::info!(removed, "Purged expired cache entries");
        }
        Err(e) => {
            metrics.purge_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Cache purge failed");
        }
    }
}
