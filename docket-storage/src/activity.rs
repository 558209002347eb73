//! Case activity oracle.
//!
//! Case activity (new filings, movements) is owned by an external append-only
//! store. The engine only ever asks one question of it: when did the most
//! recent event for a case happen? That timestamp feeds the analysis key and
//! the cache freshness check.

use async_trait::async_trait;
use chrono::Utc;
use docket_core::{CaseId, DocketResult, Timestamp};
use std::collections::HashMap;

/// Read-only accessor for the latest case activity.
///
/// # Implementation Notes
///
/// Implementations must be monotonic per case: a later call never observes an
/// older timestamp than an earlier one. The engine reads it to derive a key
/// and judge the first cache lookup, then again after taking the lock.
#[async_trait]
pub trait ActivityOracle: Send + Sync {
    /// Timestamp of the most recent activity event, or `None` when the case
    /// has never seen activity.
    async fn last_activity_for(&self, case_id: CaseId) -> DocketResult<Option<Timestamp>>;
}

/// One recorded activity event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    pub kind: String,
    pub occurred_at: Timestamp,
}

/// In-memory activity log for tests and single-process deployments.
///
/// Uses tokio::sync::RwLock for safe async access.
#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    events: tokio::sync::RwLock<HashMap<CaseId, CaseEvents>>,
}

#[derive(Debug, Default)]
struct CaseEvents {
    latest: Option<Timestamp>,
    log: Vec<ActivityEvent>,
}

impl InMemoryActivityLog {
    /// Create an empty activity log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an activity event. Returns the case's latest activity after the
    /// append, which is never older than before (out-of-order events do not
    /// move the watermark backwards).
    pub async fn record_activity(
        &self,
        case_id: CaseId,
        kind: impl Into<String>,
        occurred_at: Timestamp,
    ) -> Timestamp {
        let mut events = self.events.write().await;
        let case = events.entry(case_id).or_default();
        case.log.push(ActivityEvent {
            kind: kind.into(),
            occurred_at,
        });
        let latest = match case.latest {
            Some(current) if current >= occurred_at => current,
            _ => occurred_at,
        };
        case.latest = Some(latest);
        latest
    }

    /// Append an activity event stamped with the current time.
    pub async fn record_now(&self, case_id: CaseId, kind: impl Into<String>) -> Timestamp {
        self.record_activity(case_id, kind, Utc::now()).await
    }

    /// All events recorded for a case, in append order.
    pub async fn events_for(&self, case_id: CaseId) -> Vec<ActivityEvent> {
        self.events
            .read()
            .await
            .get(&case_id)
            .map(|c| c.log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActivityOracle for InMemoryActivityLog {
    async fn last_activity_for(&self, case_id: CaseId) -> DocketResult<Option<Timestamp>> {
        Ok(self.events.read().await.get(&case_id).and_then(|c| c.latest))
    }
}
