//! Version/job orchestration.
//!
//! Owns every lifecycle transition of [`AnalysisVersion`] and
//! [`AnalysisJob`] records. Transitions are compare-and-set against the
//! repository, so a racing completion and an out-of-band failure sweep can
//! never both win.
//!
//! ```text
//! job:      Queued ── mark_running ──→ Running ──┬── complete ──→ Completed
//!             │                                  └── fail ──────→ Failed
//!             └───────────── fail ──────────────────────────────→ Failed
//! version:  Pending ──┬── (job completes) ──→ Completed
//!                     └── (job fails) ──────→ Failed
//! ```

use std::sync::Arc;

use chrono::Utc;
use docket_core::{
    AnalysisJob, AnalysisResult, AnalysisVersion, DocketError, DocketResult, DocumentRef,
    DurationMs, EngineConfig, EntityIdType, JobId, JobStatus, LeaseHandle, RecordKind,
    StateError, StorageError, Timestamp, ValidationError, VersionStatus,
};
use docket_lock::DistributedLock;
use docket_storage::{AnalysisRepository, CacheStore, NewVersion};

/// Drives versions and jobs through their state machines.
pub struct VersionOrchestrator {
    repo: Arc<dyn AnalysisRepository>,
    cache: Arc<CacheStore>,
    lock: DistributedLock,
    config: EngineConfig,
}

impl VersionOrchestrator {
    pub fn new(
        repo: Arc<dyn AnalysisRepository>,
        cache: Arc<CacheStore>,
        lock: DistributedLock,
        config: EngineConfig,
    ) -> Self {
        Self {
            repo,
            cache,
            lock,
            config,
        }
    }

    // ========================================================================
    // CREATION
    // ========================================================================

    /// Reuse the newest unclaimed PENDING version for `(case, key)`, or create
    /// the next numbered one.
    ///
    /// Callers must hold the key's lock (or run fail-open) so two callers
    /// never race to create versions for the same key.
    pub async fn get_or_create_version(&self, new: &NewVersion) -> DocketResult<AnalysisVersion> {
        if let Some(existing) = self
            .repo
            .version_find_unclaimed(new.case_id, &new.analysis_key)
            .await?
        {
            tracing::debug!(
                case_id = %new.case_id,
                version_id = %existing.version_id,
                version_number = existing.version_number,
                "Reusing unclaimed pending version"
            );
            return Ok(existing);
        }

        let version = self.repo.version_create(new).await?;
        tracing::info!(
            case_id = %version.case_id,
            version_id = %version.version_id,
            version_number = version.version_number,
            analysis_type = %version.analysis_type,
            analysis_key = %version.analysis_key,
            "Created analysis version"
        );
        Ok(version)
    }

    /// Create the QUEUED job that will materialize `version`.
    ///
    /// `lease` is `None` only when the lock store was unreachable and the
    /// engine runs fail-open.
    pub async fn create_job(
        &self,
        version: &AnalysisVersion,
        lease: Option<&LeaseHandle>,
        documents: Vec<DocumentRef>,
        activity_snapshot: Option<Timestamp>,
    ) -> DocketResult<AnalysisJob> {
        if version.status != VersionStatus::Pending {
            return Err(StateError::InvalidVersionTransition {
                version_id: version.version_id.as_uuid(),
                from: version.status,
                to: VersionStatus::Pending,
            }
            .into());
        }

        let job = AnalysisJob {
            job_id: JobId::now_v7(),
            case_id: version.case_id,
            analysis_key: version.analysis_key.clone(),
            status: JobStatus::Queued,
            lock_key: lease.map(|l| l.lock_key.clone()),
            lock_token: lease.map(|l| l.token.clone()),
            result_version_id: version.version_id,
            progress: 0,
            documents,
            activity_snapshot,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        };
        self.repo.job_insert(&job).await?;

        tracing::info!(
            job_id = %job.job_id,
            case_id = %job.case_id,
            version_id = %version.version_id,
            leased = job.lock_token.is_some(),
            "Queued analysis job"
        );
        Ok(job)
    }

    /// Find or create a version and attach a new job to it.
    ///
    /// If the reused version was claimed by another job between lookup and
    /// insert, a fresh version is created and the insert retried once.
    pub async fn claim_version(
        &self,
        new: &NewVersion,
        lease: Option<&LeaseHandle>,
        documents: Vec<DocumentRef>,
        activity_snapshot: Option<Timestamp>,
    ) -> DocketResult<(AnalysisVersion, AnalysisJob)> {
        let version = self.get_or_create_version(new).await?;
        match self
            .create_job(&version, lease, documents.clone(), activity_snapshot)
            .await
        {
            Ok(job) => Ok((version, job)),
            Err(DocketError::Storage(StorageError::InsertFailed {
                kind: RecordKind::Job,
                reason,
            })) => {
                tracing::debug!(
                    version_id = %version.version_id,
                    reason = %reason,
                    "Version claimed concurrently, creating a fresh one"
                );
                let fresh = self.repo.version_create(new).await?;
                let job = self
                    .create_job(&fresh, lease, documents, activity_snapshot)
                    .await?;
                Ok((fresh, job))
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// QUEUED → RUNNING.
    pub async fn mark_running(&self, job_id: JobId) -> DocketResult<AnalysisJob> {
        let job = self.load_job(job_id).await?;
        ensure_job_transition(&job, JobStatus::Running)?;

        let mut running = job.clone();
        running.status = JobStatus::Running;
        running.started_at = Some(Utc::now());
        self.swap_job(&running, job.status).await?;

        tracing::info!(job_id = %job_id, case_id = %job.case_id, "Job running");
        Ok(running)
    }

    /// Record progress of a RUNNING job. `percent` must be in `0..=100`.
    pub async fn update_progress(&self, job_id: JobId, percent: u8) -> DocketResult<()> {
        if percent > 100 {
            return Err(ValidationError::InvalidValue {
                field: "progress".to_string(),
                reason: format!("{} is above 100", percent),
            }
            .into());
        }

        let job = self.load_job(job_id).await?;
        if job.status != JobStatus::Running {
            return Err(StateError::InvalidJobTransition {
                job_id: job_id.as_uuid(),
                from: job.status,
                to: JobStatus::Running,
            }
            .into());
        }
        if percent <= job.progress {
            return Ok(());
        }

        let mut updated = job;
        updated.progress = percent;
        self.swap_job(&updated, JobStatus::Running).await?;
        tracing::trace!(job_id = %job_id, progress = percent, "Job progress");
        Ok(())
    }

    /// RUNNING → COMPLETED.
    ///
    /// Marks the job and its paired version COMPLETED in one repository
    /// write, caches the version under the job's key with the job's activity
    /// snapshot, and releases the job's lease. Cache and release failures
    /// are logged and absorbed: the version is already durable at that
    /// point. If the write fails, neither record changes and the job can
    /// still be failed.
    pub async fn complete(
        &self,
        job_id: JobId,
        result: AnalysisResult,
        confidence: f32,
        duration_ms: DurationMs,
    ) -> DocketResult<AnalysisVersion> {
        let job = self.load_job(job_id).await?;
        ensure_job_transition(&job, JobStatus::Completed)?;
        let version = self.load_version_for(&job).await?;
        ensure_version_transition(&version, VersionStatus::Completed)?;

        let mut completed_job = job.clone();
        completed_job.status = JobStatus::Completed;
        completed_job.progress = 100;
        completed_job.finished_at = Some(Utc::now());

        let mut completed = version.clone();
        completed.status = VersionStatus::Completed;
        if let Some(model) = result.model_used.as_deref().filter(|m| !m.is_empty()) {
            completed.model_used = model.to_string();
        }
        completed.result = Some(result);
        completed.confidence = Some(confidence);
        completed.processing_time_ms = Some(duration_ms);

        self.finish(&completed_job, job.status, Some((&completed, version.status)))
            .await?;

        tracing::info!(
            job_id = %job_id,
            case_id = %job.case_id,
            version_id = %completed.version_id,
            version_number = completed.version_number,
            model_used = %completed.model_used,
            duration_ms,
            confidence,
            "Analysis completed"
        );

        if let Err(e) = self
            .cache
            .put(
                &job.analysis_key,
                job.case_id,
                completed.version_id,
                self.config.cache_ttl,
                job.activity_snapshot,
            )
            .await
        {
            tracing::warn!(
                error = %e,
                analysis_key = %job.analysis_key,
                "Failed to cache completed analysis"
            );
        }

        self.release_lease(&completed_job).await;
        Ok(completed)
    }

    /// QUEUED or RUNNING → FAILED.
    ///
    /// Marks the job and its paired version FAILED in one repository write
    /// and releases the job's lease. Never touches the cache. Also the entry
    /// point for out-of-band sweeps that reap jobs whose worker died.
    pub async fn fail(&self, job_id: JobId, reason: &str) -> DocketResult<AnalysisJob> {
        let job = self.load_job(job_id).await?;
        ensure_job_transition(&job, JobStatus::Failed)?;
        let version = self.load_version_for(&job).await?;

        let failed_version = if version.status == VersionStatus::Failed {
            tracing::warn!(
                job_id = %job_id,
                version_id = %version.version_id,
                "Version of failed job already failed"
            );
            None
        } else {
            ensure_version_transition(&version, VersionStatus::Failed)?;
            let mut failed_version = version;
            failed_version.status = VersionStatus::Failed;
            Some(failed_version)
        };

        let mut failed = job.clone();
        failed.status = JobStatus::Failed;
        failed.finished_at = Some(Utc::now());
        failed.error = Some(reason.to_string());
        self.finish(
            &failed,
            job.status,
            failed_version.as_ref().map(|v| (v, VersionStatus::Pending)),
        )
        .await?;

        tracing::error!(
            job_id = %job_id,
            case_id = %job.case_id,
            version_id = %job.result_version_id,
            reason = %reason,
            "Analysis failed"
        );

        self.release_lease(&failed).await;
        Ok(failed)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn load_job(&self, job_id: JobId) -> DocketResult<AnalysisJob> {
        self.repo.job_get(job_id).await?.ok_or_else(|| {
            StorageError::NotFound {
                kind: RecordKind::Job,
                id: job_id.as_uuid(),
            }
            .into()
        })
    }

    async fn load_version_for(&self, job: &AnalysisJob) -> DocketResult<AnalysisVersion> {
        self.repo
            .version_get(job.result_version_id)
            .await?
            .ok_or_else(|| {
                StorageError::NotFound {
                    kind: RecordKind::Version,
                    id: job.result_version_id.as_uuid(),
                }
                .into()
            })
    }

    /// Compare-and-set a job. A lost race surfaces as the transition the
    /// caller attempted from whatever status won.
    async fn swap_job(&self, job: &AnalysisJob, expected: JobStatus) -> DocketResult<()> {
        if self.repo.job_update(job, expected).await? {
            return Ok(());
        }
        let current = self.load_job(job.job_id).await?;
        Err(StateError::InvalidJobTransition {
            job_id: job.job_id.as_uuid(),
            from: current.status,
            to: job.status,
        }
        .into())
    }

    /// Terminal write of a job and its version. A lost race surfaces as
    /// the transition of whichever record moved first.
    async fn finish(
        &self,
        job: &AnalysisJob,
        job_expected: JobStatus,
        version: Option<(&AnalysisVersion, VersionStatus)>,
    ) -> DocketResult<()> {
        if self.repo.job_finish(job, job_expected, version).await? {
            return Ok(());
        }
        let current = self.load_job(job.job_id).await?;
        match version {
            Some((version, expected)) if current.status == job_expected => {
                let from = self
                    .repo
                    .version_get(version.version_id)
                    .await?
                    .map(|v| v.status)
                    .unwrap_or(expected);
                Err(StateError::InvalidVersionTransition {
                    version_id: version.version_id.as_uuid(),
                    from,
                    to: version.status,
                }
                .into())
            }
            _ => Err(StateError::InvalidJobTransition {
                job_id: job.job_id.as_uuid(),
                from: current.status,
                to: job.status,
            }
            .into()),
        }
    }

    async fn release_lease(&self, job: &AnalysisJob) {
        let (Some(lock_key), Some(token)) = (&job.lock_key, &job.lock_token) else {
            return;
        };
        let handle = LeaseHandle {
            lock_key: lock_key.clone(),
            token: token.clone(),
        };
        match self.lock.release(&handle).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                job_id = %job.job_id,
                lock_key = %lock_key,
                "Lease already expired or taken over"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                job_id = %job.job_id,
                lock_key = %lock_key,
                "Failed to release lease, it will expire on its own"
            ),
        }
    }
}

fn ensure_job_transition(job: &AnalysisJob, to: JobStatus) -> DocketResult<()> {
    if job.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(StateError::InvalidJobTransition {
            job_id: job.job_id.as_uuid(),
            from: job.status,
            to,
        }
        .into())
    }
}

fn ensure_version_transition(version: &AnalysisVersion, to: VersionStatus) -> DocketResult<()> {
    if version.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(StateError::InvalidVersionTransition {
            version_id: version.version_id.as_uuid(),
            from: version.status,
            to,
        }
        .into())
    }
}
