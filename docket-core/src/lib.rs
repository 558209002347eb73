//! Docket Core - Entity Types
//!
//! Pure data structures shared by every docket crate: identifiers, status
//! enums, persisted records, the content-addressed analysis key, the lease
//! typestate, errors and configuration. No I/O lives here.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod key;
pub mod lease;
pub mod validation;

pub use config::EngineConfig;
pub use entities::{
    AnalysisJob, AnalysisResult, AnalysisVersion, CacheEntry, DocumentRef, JobMessage,
};
pub use enums::{AnalysisType, EnumParseError, JobStatus, ModelTier, VersionStatus};
pub use error::{
    ConfigError, DocketError, DocketResult, LlmError, LockError, QueueError, RecordKind,
    StateError, StorageError, ValidationError,
};
pub use identity::{CaseId, DocumentId, DurationMs, EntityIdType, JobId, Timestamp, VersionId};
pub use key::{
    activity_stamp, derive_key, prompt_signature, AnalysisKey, ANALYSIS_KEY_LEN, LOCK_KEY_PREFIX,
};
pub use lease::{Held, Lease, LeaseData, LeaseHandle, LeaseState};
