//! Error types for docket operations

use crate::{JobStatus, VersionStatus};
use thiserror::Error;
use uuid::Uuid;

/// Kind of persisted record, used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Version,
    Job,
    CacheEntry,
    Activity,
    Document,
}

/// Input validation errors. Rejected before any cache or lock interaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Document set is empty")]
    EmptyDocumentSet,

    #[error("Document {document_id} listed with conflicting content hashes")]
    ConflictingDocumentHash { document_id: Uuid },
}

/// Relational store and cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {kind:?} with id {id}")]
    NotFound { kind: RecordKind, id: Uuid },

    #[error("Insert failed for {kind:?}: {reason}")]
    InsertFailed { kind: RecordKind, reason: String },

    #[error("Update failed for {kind:?} with id {id}: {reason}")]
    UpdateFailed {
        kind: RecordKind,
        id: Uuid,
        reason: String,
    },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Connection unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Corrupt record for {kind:?}: {reason}")]
    Corrupt { kind: RecordKind, reason: String },
}

/// Shared key-value store errors. Never fatal to a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Key-value store unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Key-value store command failed: {reason}")]
    CommandFailed { reason: String },
}

/// AI invocation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No analysis provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Request to {provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: i64 },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl LlmError {
    /// Whether a retry by the job-queue transport may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } => true,
            LlmError::RequestFailed { status, .. } => *status >= 500 || *status == 429,
            LlmError::ProviderNotConfigured | LlmError::InvalidResponse { .. } => false,
        }
    }
}

/// Job-queue transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue closed")]
    Closed,

    #[error("Enqueue failed: {reason}")]
    EnqueueFailed { reason: String },
}

/// Illegal lifecycle transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidJobTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Version {version_id} cannot move from {from} to {to}")]
    InvalidVersionTransition {
        version_id: Uuid,
        from: VersionStatus,
        to: VersionStatus,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all docket errors.
#[derive(Debug, Clone, Error)]
pub enum DocketError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lock store error: {0}")]
    Lock(#[from] LockError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl DocketError {
    /// Whether the caller supplied bad input.
    pub fn is_validation(&self) -> bool {
        matches!(self, DocketError::Validation(_))
    }
}

/// Result type alias for docket operations.
pub type DocketResult<T> = Result<T, DocketError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            kind: RecordKind::Job,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Record not found"));
        assert!(msg.contains("Job"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_llm_error_transience() {
        assert!(LlmError::Timeout {
            provider: "p".to_string(),
            elapsed_ms: 10
        }
        .is_transient());
        assert!(LlmError::RequestFailed {
            provider: "p".to_string(),
            status: 503,
            message: "busy".to_string()
        }
        .is_transient());
        assert!(!LlmError::RequestFailed {
            provider: "p".to_string(),
            status: 400,
            message: "bad".to_string()
        }
        .is_transient());
        assert!(!LlmError::InvalidResponse {
            provider: "p".to_string(),
            reason: "no json".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError::InvalidJobTransition {
            job_id: Uuid::nil(),
            from: JobStatus::Completed,
            to: JobStatus::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("Completed"));
        assert!(msg.contains("Running"));
    }

    #[test]
    fn test_docket_error_from_variants() {
        let validation = DocketError::from(ValidationError::EmptyDocumentSet);
        assert!(validation.is_validation());

        let storage = DocketError::from(StorageError::QueryFailed {
            reason: "x".to_string(),
        });
        assert!(matches!(storage, DocketError::Storage(_)));

        let lock = DocketError::from(LockError::Unreachable {
            reason: "refused".to_string(),
        });
        assert!(matches!(lock, DocketError::Lock(_)));

        let llm = DocketError::from(LlmError::ProviderNotConfigured);
        assert!(matches!(llm, DocketError::Llm(_)));

        let queue = DocketError::from(QueueError::Closed);
        assert!(matches!(queue, DocketError::Queue(_)));

        let config = DocketError::from(ConfigError::MissingRequired {
            field: "lock_ttl".to_string(),
        });
        assert!(matches!(config, DocketError::Config(_)));
    }
}
