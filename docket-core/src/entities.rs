//! Entity records persisted by the engine.

use crate::{
    AnalysisKey, AnalysisType, CaseId, DocumentId, DurationMs, JobId, JobStatus, Timestamp,
    VersionId, VersionStatus,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// DOCUMENTS
// ============================================================================

/// A source document attached to a case, identified by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_id: DocumentId,
    /// Hex digest of the document bytes, computed by the document store.
    pub content_hash: String,
    pub size_bytes: u64,
}

impl DocumentRef {
    pub fn new(document_id: DocumentId, content_hash: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            document_id,
            content_hash: content_hash.into(),
            size_bytes,
        }
    }
}

// ============================================================================
// ANALYSIS VERSION
// ============================================================================

/// Structured output of a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub content: serde_json::Value,
    pub tokens_used: i64,
    /// Concrete model that served the request, when the provider named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

/// One numbered, auditable outcome of an analysis for a case.
///
/// `version_number` is strictly increasing per case and never reused.
/// The record is immutable once `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVersion {
    pub version_id: VersionId,
    pub case_id: CaseId,
    pub version_number: i32,
    pub analysis_type: AnalysisType,
    pub model_used: String,
    pub analysis_key: AnalysisKey,
    pub status: VersionStatus,
    pub created_at: Timestamp,
    pub result: Option<AnalysisResult>,
    pub confidence: Option<f32>,
    pub processing_time_ms: Option<DurationMs>,
}

// ============================================================================
// ANALYSIS JOB
// ============================================================================

/// One in-flight attempt to materialize a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: JobId,
    pub case_id: CaseId,
    pub analysis_key: AnalysisKey,
    pub status: JobStatus,
    /// Name of the lease in the shared key-value store, kept alongside the
    /// token so release never has to reconstruct it.
    pub lock_key: Option<String>,
    /// `None` when the job was created while the lock store was unreachable.
    pub lock_token: Option<String>,
    pub result_version_id: VersionId,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub documents: Vec<DocumentRef>,
    /// Activity timestamp the key was derived with.
    pub activity_snapshot: Option<Timestamp>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub error: Option<String>,
}

/// Message handed to the job-queue transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub case_id: CaseId,
    pub analysis_key: AnalysisKey,
    pub lock_token: Option<String>,
}

impl From<&AnalysisJob> for JobMessage {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            job_id: job.job_id,
            case_id: job.case_id,
            analysis_key: job.analysis_key.clone(),
            lock_token: job.lock_token.clone(),
        }
    }
}

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// Cached pointer from an analysis key to a completed version.
///
/// Never mutated in place except for the access counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: AnalysisKey,
    pub case_id: CaseId,
    pub result_ref: VersionId,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub access_count: u64,
    pub last_accessed_at: Option<Timestamp>,
    pub activity_at_creation: Option<Timestamp>,
}

impl CacheEntry {
    /// Check if the entry has outlived its TTL.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    /// Check if case activity newer than the entry's snapshot exists.
    pub fn is_superseded_by(&self, latest_activity: Option<Timestamp>) -> bool {
        match (latest_activity, self.activity_at_creation) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(latest), Some(snapshot)) => latest > snapshot,
        }
    }
}
