//! The analysis engine facade.
//!
//! `request_analysis` is the only entry point callers need: it derives the
//! key, serves a fresh cached version when one exists, and otherwise takes
//! the key's lock and queues exactly one job. Infrastructure hiccups in the
//! cache or the lock store degrade to recomputation; they are logged here
//! and never returned to the caller. Activity oracle errors are returned,
//! since freshness cannot be judged without it.

use std::sync::Arc;
use std::time::Duration;

use docket_core::validation::{validate_case_id, validate_documents, validate_required};
use docket_core::{
    derive_key, prompt_signature, AnalysisJob, AnalysisKey, AnalysisType, AnalysisVersion,
    CaseId, DocketError, DocketResult, DocumentRef, EngineConfig, EntityIdType, JobId,
    JobMessage, LeaseHandle, RecordKind, StorageError, Timestamp, VersionStatus,
};
use docket_lock::{DistributedLock, LockAttempt};
use docket_storage::{
    ActivityOracle, AnalysisRepository, CacheLookup, CacheStats, CacheStore, NewVersion,
};
use serde::{Deserialize, Serialize};

use crate::orchestrator::VersionOrchestrator;
use crate::queue::JobQueue;

/// One caller request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub case_id: CaseId,
    pub analysis_type: AnalysisType,
    pub documents: Vec<DocumentRef>,
    /// Falls back to the configured default model.
    pub model_version: Option<String>,
}

impl AnalysisRequest {
    pub fn new(case_id: CaseId, analysis_type: AnalysisType, documents: Vec<DocumentRef>) -> Self {
        Self {
            case_id,
            analysis_type,
            documents,
            model_version: None,
        }
    }

    pub fn with_model_version(mut self, model_version: impl Into<String>) -> Self {
        self.model_version = Some(model_version.into());
        self
    }
}

/// What the caller gets back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AnalysisOutcome {
    /// A completed version is still valid for these inputs.
    Cached { version: AnalysisVersion },
    /// A new job was queued to materialize `version`.
    Queued {
        version: AnalysisVersion,
        job_id: JobId,
    },
    /// Another caller is already computing this key.
    Busy { wait_hint_seconds: u64 },
}

impl AnalysisOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            AnalysisOutcome::Cached { .. } => "cached",
            AnalysisOutcome::Queued { .. } => "queued",
            AnalysisOutcome::Busy { .. } => "busy",
        }
    }

    pub fn version(&self) -> Option<&AnalysisVersion> {
        match self {
            AnalysisOutcome::Cached { version } | AnalysisOutcome::Queued { version, .. } => {
                Some(version)
            }
            AnalysisOutcome::Busy { .. } => None,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            AnalysisOutcome::Queued { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    pub fn wait_hint_seconds(&self) -> Option<u64> {
        match self {
            AnalysisOutcome::Busy { wait_hint_seconds } => Some(*wait_hint_seconds),
            _ => None,
        }
    }
}

/// Collaborators the engine is assembled from.
pub struct EngineComponents {
    pub repository: Arc<dyn AnalysisRepository>,
    pub cache: Arc<CacheStore>,
    pub oracle: Arc<dyn ActivityOracle>,
    pub lock: DistributedLock,
    pub queue: Arc<dyn JobQueue>,
}

/// Request-side coordinator. Cheap to share behind an `Arc`.
pub struct AnalysisEngine {
    config: EngineConfig,
    repo: Arc<dyn AnalysisRepository>,
    cache: Arc<CacheStore>,
    oracle: Arc<dyn ActivityOracle>,
    lock: DistributedLock,
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<VersionOrchestrator>,
}

impl AnalysisEngine {
    pub fn new(config: EngineConfig, components: EngineComponents) -> DocketResult<Self> {
        config.validate()?;
        let orchestrator = Arc::new(VersionOrchestrator::new(
            components.repository.clone(),
            components.cache.clone(),
            components.lock.clone(),
            config.clone(),
        ));
        Ok(Self {
            config,
            repo: components.repository,
            cache: components.cache,
            oracle: components.oracle,
            lock: components.lock,
            queue: components.queue,
            orchestrator,
        })
    }

    /// Orchestrator shared with executors so both sides run the same
    /// transitions.
    pub fn orchestrator(&self) -> Arc<VersionOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Key a request would be computed under right now.
    pub async fn analysis_key_for(&self, request: &AnalysisRequest) -> DocketResult<AnalysisKey> {
        let model_version = self.model_version(request);
        let last_activity = self.oracle.last_activity_for(request.case_id).await?;
        Ok(self.derive(request, model_version, last_activity))
    }

    /// Serve, queue, or report contention for one analysis request.
    pub async fn request_analysis(&self, request: &AnalysisRequest) -> DocketResult<AnalysisOutcome> {
        validate_case_id(request.case_id)?;
        validate_documents(&request.documents)?;
        let model_version = self.model_version(request);
        validate_required("model_version", model_version)?;

        let last_activity = self.oracle.last_activity_for(request.case_id).await?;
        let key = self.derive(request, model_version, last_activity);

        if let Some(version) = self.cached_version(&key, request.case_id, last_activity).await {
            tracing::info!(
                case_id = %request.case_id,
                analysis_key = %key,
                version_id = %version.version_id,
                "Serving cached analysis"
            );
            return Ok(AnalysisOutcome::Cached { version });
        }

        let lease = match self.lock.acquire(&key, self.config.lock_ttl).await {
            Ok(LockAttempt::Acquired(lease)) => Some(lease.into_handle()),
            Ok(LockAttempt::Busy { remaining }) => {
                let wait_hint_seconds = wait_hint(remaining);
                tracing::info!(
                    case_id = %request.case_id,
                    analysis_key = %key,
                    wait_hint_seconds,
                    "Analysis already in progress"
                );
                return Ok(AnalysisOutcome::Busy { wait_hint_seconds });
            }
            Err(e) if self.config.lock_fail_open => {
                tracing::warn!(
                    error = %e,
                    analysis_key = %key,
                    "Lock store unavailable, computing without a lease"
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        // A computation may have finished between the first lookup and the acquire.
        let latest = match self.oracle.last_activity_for(request.case_id).await {
            Ok(latest) => latest,
            Err(e) => {
                self.release(lease.as_ref()).await;
                return Err(e);
            }
        };
        if let Some(version) = self.cached_version(&key, request.case_id, latest).await {
            self.release(lease.as_ref()).await;
            return Ok(AnalysisOutcome::Cached { version });
        }

        let new = NewVersion {
            case_id: request.case_id,
            analysis_type: request.analysis_type,
            model_used: model_version.to_string(),
            analysis_key: key.clone(),
        };
        let (version, job) = match self
            .orchestrator
            .claim_version(
                &new,
                lease.as_ref(),
                request.documents.clone(),
                last_activity,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.release(lease.as_ref()).await;
                return Err(e);
            }
        };

        if let Err(e) = self.queue.enqueue(JobMessage::from(&job)).await {
            tracing::error!(error = %e, job_id = %job.job_id, "Failed to enqueue job");
            // Releases the lease as well.
            if let Err(fail_err) = self
                .orchestrator
                .fail(job.job_id, &format!("enqueue failed: {}", e))
                .await
            {
                tracing::error!(error = %fail_err, job_id = %job.job_id, "Failed to record job failure");
            }
            return Err(e);
        }

        Ok(AnalysisOutcome::Queued {
            version,
            job_id: job.job_id,
        })
    }

    /// Current state of a job.
    pub async fn get_job_status(&self, job_id: JobId) -> DocketResult<AnalysisJob> {
        self.repo.job_get(job_id).await?.ok_or_else(|| {
            DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Job,
                id: job_id.as_uuid(),
            })
        })
    }

    /// Newest COMPLETED version of a case, optionally of one type.
    pub async fn get_latest_version(
        &self,
        case_id: CaseId,
        analysis_type: Option<AnalysisType>,
    ) -> DocketResult<Option<AnalysisVersion>> {
        validate_case_id(case_id)?;
        self.repo.version_latest_completed(case_id, analysis_type).await
    }

    /// Every version of a case in version-number order.
    pub async fn list_versions(&self, case_id: CaseId) -> DocketResult<Vec<AnalysisVersion>> {
        validate_case_id(case_id)?;
        self.repo.version_list_by_case(case_id).await
    }

    pub async fn cache_stats(&self) -> DocketResult<CacheStats> {
        self.cache.stats().await
    }

    fn model_version<'a>(&'a self, request: &'a AnalysisRequest) -> &'a str {
        request
            .model_version
            .as_deref()
            .unwrap_or(&self.config.default_model_version)
    }

    fn derive(
        &self,
        request: &AnalysisRequest,
        model_version: &str,
        last_activity: Option<Timestamp>,
    ) -> AnalysisKey {
        let signature = prompt_signature(
            request.analysis_type,
            &self.config.prompt_template_version,
        );
        derive_key(
            request.case_id,
            request.documents.iter().map(|d| d.content_hash.as_str()),
            model_version,
            &signature,
            last_activity,
        )
    }

    /// Completed version behind a fresh cache entry for `case_id`. Freshness
    /// is judged against `latest_activity`, read by the caller, so the only
    /// failures left here are cache and repository hiccups, and those are
    /// misses.
    async fn cached_version(
        &self,
        key: &AnalysisKey,
        case_id: CaseId,
        latest_activity: Option<Timestamp>,
    ) -> Option<AnalysisVersion> {
        let entry = match self.cache.get_for_case(key, case_id, latest_activity).await {
            Ok(CacheLookup::Hit(entry)) => entry,
            Ok(CacheLookup::Miss(reason)) => {
                tracing::debug!(analysis_key = %key, reason = reason.as_str(), "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, analysis_key = %key, "Cache lookup failed, treating as miss");
                return None;
            }
        };

        match self.repo.version_get(entry.result_ref).await {
            Ok(Some(version)) if version.status == VersionStatus::Completed => Some(version),
            Ok(_) => {
                tracing::warn!(
                    analysis_key = %key,
                    version_id = %entry.result_ref,
                    "Cache entry points at a missing or unfinished version, dropping it"
                );
                if let Err(e) = self.cache.invalidate(key).await {
                    tracing::warn!(error = %e, analysis_key = %key, "Failed to drop cache entry");
                }
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, analysis_key = %key, "Version lookup failed, treating as miss");
                None
            }
        }
    }

    async fn release(&self, lease: Option<&LeaseHandle>) {
        let Some(handle) = lease else {
            return;
        };
        if let Err(e) = self.lock.release(handle).await {
            tracing::warn!(error = %e, lock_key = %handle.lock_key, "Failed to release lease");
        }
    }
}

/// Whole seconds until the holder's lease runs out, at least one.
fn wait_hint(remaining: Option<Duration>) -> u64 {
    remaining
        .map(|d| d.as_millis().div_ceil(1000) as u64)
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_hint_rounds_up() {
        assert_eq!(wait_hint(Some(Duration::from_millis(1))), 1);
        assert_eq!(wait_hint(Some(Duration::from_millis(1000))), 1);
        assert_eq!(wait_hint(Some(Duration::from_millis(1001))), 2);
        assert_eq!(wait_hint(Some(Duration::from_secs(600))), 600);
    }

    #[test]
    fn test_wait_hint_is_positive() {
        assert_eq!(wait_hint(Some(Duration::ZERO)), 1);
        assert_eq!(wait_hint(None), 1);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let busy = AnalysisOutcome::Busy {
            wait_hint_seconds: 12,
        };
        let json = serde_json::to_value(&busy).unwrap();
        assert_eq!(json["status"], "busy");
        assert_eq!(json["wait_hint_seconds"], 12);
        assert_eq!(busy.status(), "busy");
        assert!(busy.version().is_none());
    }
}
