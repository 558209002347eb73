//! Background executor.
//!
//! Turns one delivered [`JobMessage`] into a terminal job. Deliveries are
//! at-least-once, so the executor re-reads the job first and no-ops on
//! anything already finished. Retries are the transport's business: a
//! failed invocation is recorded and the error returned.

use std::sync::Arc;

use docket_core::{
    prompt_signature, AnalysisJob, AnalysisResult, AnalysisVersion, DocketError, DocketResult,
    EngineConfig, EntityIdType, JobMessage, JobStatus, LeaseHandle, LlmError, RecordKind,
    StorageError, VersionId,
};
use docket_llm::{Completion, PromptDocument, PromptPayload, ProviderRegistry, UsageTracker};
use docket_lock::DistributedLock;
use docket_storage::AnalysisRepository;

use crate::documents::DocumentStore;
use crate::orchestrator::VersionOrchestrator;

/// Why a delivery was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The job already completed or failed.
    AlreadyTerminal(JobStatus),
    /// The message carries a lock token the job no longer holds.
    StaleDelivery,
    /// Another executor moved the job to RUNNING first.
    ClaimedElsewhere,
}

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed { version_id: VersionId },
    Skipped { reason: SkipReason },
}

/// Executes queued analysis jobs.
pub struct AnalysisExecutor {
    orchestrator: Arc<VersionOrchestrator>,
    repo: Arc<dyn AnalysisRepository>,
    documents: Arc<dyn DocumentStore>,
    providers: ProviderRegistry,
    lock: DistributedLock,
    usage: Arc<UsageTracker>,
    config: EngineConfig,
}

impl AnalysisExecutor {
    pub fn new(
        orchestrator: Arc<VersionOrchestrator>,
        repo: Arc<dyn AnalysisRepository>,
        documents: Arc<dyn DocumentStore>,
        providers: ProviderRegistry,
        lock: DistributedLock,
        config: EngineConfig,
    ) -> Self {
        Self {
            orchestrator,
            repo,
            documents,
            providers,
            lock,
            usage: Arc::new(UsageTracker::new()),
            config,
        }
    }

    /// Share a usage tracker with other executors.
    pub fn with_usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> Arc<UsageTracker> {
        self.usage.clone()
    }

    /// Run one delivered job to a terminal state.
    ///
    /// Returns `Err` only when the job was failed by this call (or could
    /// not be loaded), so the transport can apply its retry policy.
    pub async fn execute(&self, message: &JobMessage) -> DocketResult<ExecutionOutcome> {
        let job = self.repo.job_get(message.job_id).await?.ok_or_else(|| {
            DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Job,
                id: message.job_id.as_uuid(),
            })
        })?;

        if job.status.is_terminal() {
            tracing::debug!(
                job_id = %job.job_id,
                status = %job.status,
                "Skipping delivery of finished job"
            );
            return Ok(skipped(SkipReason::AlreadyTerminal(job.status)));
        }
        if job.lock_token != message.lock_token {
            tracing::warn!(job_id = %job.job_id, "Skipping delivery with mismatched lock token");
            return Ok(skipped(SkipReason::StaleDelivery));
        }

        let job = match job.status {
            JobStatus::Queued => match self.orchestrator.mark_running(job.job_id).await {
                Ok(running) => running,
                Err(DocketError::State(_)) => {
                    tracing::debug!(job_id = %job.job_id, "Job claimed by another executor");
                    return Ok(skipped(SkipReason::ClaimedElsewhere));
                }
                Err(e) => return Err(e),
            },
            _ => {
                tracing::warn!(
                    job_id = %job.job_id,
                    "Resuming redelivered running job"
                );
                job
            }
        };

        match self.run(&job).await {
            Ok(version) => Ok(ExecutionOutcome::Completed {
                version_id: version.version_id,
            }),
            Err(e) => {
                if let Err(fail_err) = self.orchestrator.fail(job.job_id, &e.to_string()).await {
                    tracing::error!(
                        error = %fail_err,
                        job_id = %job.job_id,
                        "Failed to record job failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run(&self, job: &AnalysisJob) -> DocketResult<AnalysisVersion> {
        let version = self.repo.version_get(job.result_version_id).await?.ok_or_else(|| {
            DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Version,
                id: job.result_version_id.as_uuid(),
            })
        })?;

        self.refresh_lease(job).await;
        self.orchestrator.update_progress(job.job_id, 10).await?;

        let payload = self.build_payload(job, &version).await?;
        self.orchestrator.update_progress(job.job_id, 30).await?;

        let tier = version.analysis_type.default_tier();
        let provider = self.providers.provider_for(tier)?;
        tracing::debug!(
            job_id = %job.job_id,
            provider = provider.provider_id(),
            tier = %tier,
            estimated_tokens = payload.estimated_input_tokens(),
            "Invoking analysis provider"
        );

        let completion = match provider.invoke(&payload, tier).await {
            Ok(completion) => completion,
            Err(e) => {
                self.usage.record_failure();
                tracing::warn!(
                    job_id = %job.job_id,
                    error = %e,
                    transient = e.is_transient(),
                    "Analysis provider failed"
                );
                return Err(e.into());
            }
        };

        if let Err(e) = check_completion(provider.provider_id(), &completion) {
            self.usage.record_failure();
            return Err(e.into());
        }
        self.usage.record_completion(tier, completion.tokens_used);
        self.orchestrator.update_progress(job.job_id, 90).await?;

        self.orchestrator
            .complete(
                job.job_id,
                AnalysisResult {
                    content: completion.content,
                    tokens_used: completion.tokens_used,
                    model_used: Some(completion.model_used),
                },
                completion.confidence,
                completion.duration_ms,
            )
            .await
    }

    async fn build_payload(
        &self,
        job: &AnalysisJob,
        version: &AnalysisVersion,
    ) -> DocketResult<PromptPayload> {
        let mut documents = Vec::with_capacity(job.documents.len());
        for doc in &job.documents {
            let text = self.documents.extracted_text(doc).await?;
            documents.push(PromptDocument {
                document_id: doc.document_id,
                content_hash: doc.content_hash.clone(),
                text,
            });
        }
        let case_context = self.documents.case_context(job.case_id).await?;

        Ok(PromptPayload {
            case_id: job.case_id,
            analysis_type: version.analysis_type,
            prompt_signature: prompt_signature(
                version.analysis_type,
                &self.config.prompt_template_version,
            ),
            model_version: version.model_used.clone(),
            documents,
            case_context,
        })
    }

    /// Push the lease out by a full TTL before the long call.
    async fn refresh_lease(&self, job: &AnalysisJob) {
        let (Some(lock_key), Some(token)) = (&job.lock_key, &job.lock_token) else {
            return;
        };
        let handle = LeaseHandle {
            lock_key: lock_key.clone(),
            token: token.clone(),
        };
        match self.lock.extend(&handle, self.config.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                job_id = %job.job_id,
                lock_key = %lock_key,
                "Lease lost before execution, continuing"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                job_id = %job.job_id,
                "Could not extend lease, continuing"
            ),
        }
    }
}

fn skipped(reason: SkipReason) -> ExecutionOutcome {
    ExecutionOutcome::Skipped { reason }
}

fn check_completion(provider: &str, completion: &Completion) -> Result<(), LlmError> {
    let invalid = |reason: String| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason,
    };
    if !completion.confidence.is_finite() || !(0.0..=1.0).contains(&completion.confidence) {
        return Err(invalid(format!(
            "confidence {} outside [0, 1]",
            completion.confidence
        )));
    }
    if completion.content.is_null() {
        return Err(invalid("empty content".to_string()));
    }
    if completion.tokens_used < 0 {
        return Err(invalid(format!(
            "negative token count {}",
            completion.tokens_used
        )));
    }
    if completion.duration_ms < 0 {
        return Err(invalid(format!(
            "negative duration {}ms",
            completion.duration_ms
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(confidence: f32, content: serde_json::Value) -> Completion {
        Completion {
            content,
            tokens_used: 10,
            confidence,
            model_used: "m".to_string(),
            duration_ms: 250,
        }
    }

    #[test]
    fn test_check_completion_accepts_valid() {
        assert!(check_completion("p", &completion(0.0, serde_json::json!({}))).is_ok());
        assert!(check_completion("p", &completion(1.0, serde_json::json!("x"))).is_ok());
    }

    #[test]
    fn test_check_completion_rejects_malformed() {
        for bad in [
            completion(1.5, serde_json::json!({})),
            completion(-0.1, serde_json::json!({})),
            completion(f32::NAN, serde_json::json!({})),
            completion(0.5, serde_json::Value::Null),
            Completion {
                duration_ms: -1,
                ..completion(0.5, serde_json::json!({}))
            },
        ] {
            let err = check_completion("p", &bad).unwrap_err();
            assert!(matches!(err, LlmError::InvalidResponse { .. }));
            assert!(!err.is_transient());
        }
    }
}
