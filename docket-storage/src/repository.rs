//! Version and job repository.
//!
//! Durable home of [`AnalysisVersion`] and [`AnalysisJob`] records. All
//! status changes go through compare-and-set updates keyed on the status the
//! caller last observed, so two workers racing on the same record cannot
//! both win.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use docket_core::{
    AnalysisJob, AnalysisKey, AnalysisType, AnalysisVersion, CaseId, DocketError, DocketResult,
    EntityIdType, JobId, JobStatus, RecordKind, StorageError, VersionId, VersionStatus,
};
use tokio::sync::RwLock;

/// Insert payload for a new version. Number, id and timestamps are assigned
/// by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    pub case_id: CaseId,
    pub analysis_type: AnalysisType,
    pub model_used: String,
    pub analysis_key: AnalysisKey,
}

/// Persistence for versions and jobs.
///
/// # Implementation Notes
///
/// - `version_create` must assign `version_number` atomically: concurrent
///   creates for one case never observe the same number, and numbers are
///   never reused.
/// - `*_update` methods are compare-and-set on status. They return `false`
///   when the stored status no longer matches `expected`.
/// - A version whose stored status is terminal must never be modified.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    // ========================================================================
    // VERSION OPERATIONS
    // ========================================================================

    /// Create a PENDING version with the next number for its case.
    async fn version_create(&self, new: &NewVersion) -> DocketResult<AnalysisVersion>;

    /// Get a version by ID.
    async fn version_get(&self, id: VersionId) -> DocketResult<Option<AnalysisVersion>>;

    /// Find a PENDING version for `(case_id, key)` that no job references yet.
    async fn version_find_unclaimed(
        &self,
        case_id: CaseId,
        key: &AnalysisKey,
    ) -> DocketResult<Option<AnalysisVersion>>;

    /// Overwrite a version if its stored status equals `expected`.
    async fn version_update(
        &self,
        version: &AnalysisVersion,
        expected: VersionStatus,
    ) -> DocketResult<bool>;

    /// Highest-numbered COMPLETED version of a case, optionally of one type.
    async fn version_latest_completed(
        &self,
        case_id: CaseId,
        analysis_type: Option<AnalysisType>,
    ) -> DocketResult<Option<AnalysisVersion>>;

    /// All versions of a case, ascending by number.
    async fn version_list_by_case(&self, case_id: CaseId) -> DocketResult<Vec<AnalysisVersion>>;

    // ========================================================================
    // JOB OPERATIONS
    // ========================================================================

    /// Insert a new job. Fails if another job already targets the same version.
    async fn job_insert(&self, job: &AnalysisJob) -> DocketResult<()>;

    /// Get a job by ID.
    async fn job_get(&self, id: JobId) -> DocketResult<Option<AnalysisJob>>;

    /// Overwrite a job if its stored status equals `expected`.
    async fn job_update(&self, job: &AnalysisJob, expected: JobStatus) -> DocketResult<bool>;

    /// Write a job's terminal state together with its version's, as one unit.
    ///
    /// Each row is compare-and-set against its expected status. Either both
    /// rows are written or neither is; `false` means a stored status had
    /// moved on. `version = None` writes the job alone.
    async fn job_finish(
        &self,
        job: &AnalysisJob,
        job_expected: JobStatus,
        version: Option<(&AnalysisVersion, VersionStatus)>,
    ) -> DocketResult<bool>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

#[derive(Debug, Default)]
struct RepoState {
    versions: HashMap<VersionId, AnalysisVersion>,
    jobs: HashMap<JobId, AnalysisJob>,
    /// Last number handed out per case.
    counters: HashMap<CaseId, i32>,
}

/// In-memory repository for tests and single-process deployments.
///
/// Uses tokio::sync::RwLock for safe async access. One lock guards all maps so
/// number assignment and claim checks are atomic.
#[derive(Debug, Default)]
pub struct InMemoryAnalysisRepository {
    state: RwLock<RepoState>,
}

impl InMemoryAnalysisRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions.
    pub async fn version_count(&self) -> usize {
        self.state.read().await.versions.len()
    }

    /// Number of stored jobs.
    pub async fn job_count(&self) -> usize {
        self.state.read().await.jobs.len()
    }
}

#[async_trait]
impl AnalysisRepository for InMemoryAnalysisRepository {
    async fn version_create(&self, new: &NewVersion) -> DocketResult<AnalysisVersion> {
        let mut state = self.state.write().await;
        let counter = state.counters.entry(new.case_id).or_insert(0);
        *counter += 1;
        let version = AnalysisVersion {
            version_id: VersionId::now_v7(),
            case_id: new.case_id,
            version_number: *counter,
            analysis_type: new.analysis_type,
            model_used: new.model_used.clone(),
            analysis_key: new.analysis_key.clone(),
            status: VersionStatus::Pending,
            created_at: Utc::now(),
            result: None,
            confidence: None,
            processing_time_ms: None,
        };
        state.versions.insert(version.version_id, version.clone());
        Ok(version)
    }

    async fn version_get(&self, id: VersionId) -> DocketResult<Option<AnalysisVersion>> {
        Ok(self.state.read().await.versions.get(&id).cloned())
    }

    async fn version_find_unclaimed(
        &self,
        case_id: CaseId,
        key: &AnalysisKey,
    ) -> DocketResult<Option<AnalysisVersion>> {
        let state = self.state.read().await;
        let unclaimed = state
            .versions
            .values()
            .filter(|v| {
                v.case_id == case_id
                    && &v.analysis_key == key
                    && v.status == VersionStatus::Pending
            })
            .filter(|v| !state.jobs.values().any(|j| j.result_version_id == v.version_id))
            .max_by_key(|v| v.version_number)
            .cloned();
        Ok(unclaimed)
    }

    async fn version_update(
        &self,
        version: &AnalysisVersion,
        expected: VersionStatus,
    ) -> DocketResult<bool> {
        let mut state = self.state.write().await;
        let stored = state.versions.get_mut(&version.version_id).ok_or_else(|| {
            DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Version,
                id: version.version_id.as_uuid(),
            })
        })?;
        if stored.status != expected {
            return Ok(false);
        }
        if stored.status.is_terminal() {
            return Err(DocketError::Storage(StorageError::UpdateFailed {
                kind: RecordKind::Version,
                id: version.version_id.as_uuid(),
                reason: "terminal versions are immutable".to_string(),
            }));
        }
        *stored = version.clone();
        Ok(true)
    }

    async fn version_latest_completed(
        &self,
        case_id: CaseId,
        analysis_type: Option<AnalysisType>,
    ) -> DocketResult<Option<AnalysisVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .values()
            .filter(|v| v.case_id == case_id && v.status == VersionStatus::Completed)
            .filter(|v| analysis_type.map_or(true, |t| v.analysis_type == t))
            .max_by_key(|v| v.version_number)
            .cloned())
    }

    async fn version_list_by_case(&self, case_id: CaseId) -> DocketResult<Vec<AnalysisVersion>> {
        let state = self.state.read().await;
        let mut versions: Vec<_> = state
            .versions
            .values()
            .filter(|v| v.case_id == case_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn job_insert(&self, job: &AnalysisJob) -> DocketResult<()> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.job_id) {
            return Err(DocketError::Storage(StorageError::InsertFailed {
                kind: RecordKind::Job,
                reason: "already exists".to_string(),
            }));
        }
        if !state.versions.contains_key(&job.result_version_id) {
            return Err(DocketError::Storage(StorageError::InsertFailed {
                kind: RecordKind::Job,
                reason: format!("version {} does not exist", job.result_version_id),
            }));
        }
        if state
            .jobs
            .values()
            .any(|j| j.result_version_id == job.result_version_id)
        {
            return Err(DocketError::Storage(StorageError::InsertFailed {
                kind: RecordKind::Job,
                reason: format!("version {} already claimed", job.result_version_id),
            }));
        }
        state.jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn job_get(&self, id: JobId) -> DocketResult<Option<AnalysisJob>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn job_update(&self, job: &AnalysisJob, expected: JobStatus) -> DocketResult<bool> {
        let mut state = self.state.write().await;
        let stored = state.jobs.get_mut(&job.job_id).ok_or_else(|| {
            DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Job,
                id: job.job_id.as_uuid(),
            })
        })?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = job.clone();
        Ok(true)
    }

    async fn job_finish(
        &self,
        job: &AnalysisJob,
        job_expected: JobStatus,
        version: Option<(&AnalysisVersion, VersionStatus)>,
    ) -> DocketResult<bool> {
        let mut state = self.state.write().await;
        let stored_job = state.jobs.get(&job.job_id).ok_or_else(|| {
            DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Job,
                id: job.job_id.as_uuid(),
            })
        })?;
        if stored_job.status != job_expected {
            return Ok(false);
        }

        if let Some((version, expected)) = version {
            let stored = state.versions.get(&version.version_id).ok_or_else(|| {
                DocketError::Storage(StorageError::NotFound {
                    kind: RecordKind::Version,
                    id: version.version_id.as_uuid(),
                })
            })?;
            if stored.status != expected {
                return Ok(false);
            }
            if stored.status.is_terminal() {
                return Err(DocketError::Storage(StorageError::UpdateFailed {
                    kind: RecordKind::Version,
                    id: version.version_id.as_uuid(),
                    reason: "terminal versions are immutable".to_string(),
                }));
            }
            state.versions.insert(version.version_id, version.clone());
        }
        state.jobs.insert(job.job_id, job.clone());
        Ok(true)
    }
}
