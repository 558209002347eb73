//! Enum types for docket entities
//!
//! Every enum that is persisted has a stable database string form
//! (`as_db_str` / `from_db_str`). Parsing is case-insensitive and accepts the
//! common spellings the host application has used over time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! impl_db_str_traits {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_db_str())
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

// ============================================================================
// ANALYSIS TYPE
// ============================================================================

/// Kind of analysis requested for a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisType {
    /// Narrative summary of the whole case file
    CaseSummary,
    /// Exposure and outcome risk assessment
    RiskAssessment,
    /// Procedural deadlines found in filings
    DeadlineExtraction,
    /// Digest of the most recent case movements
    MovementDigest,
}

impl AnalysisType {
    /// All analysis types, in a stable order.
    pub const ALL: [AnalysisType; 4] = [
        AnalysisType::CaseSummary,
        AnalysisType::RiskAssessment,
        AnalysisType::DeadlineExtraction,
        AnalysisType::MovementDigest,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AnalysisType::CaseSummary => "CaseSummary",
            AnalysisType::RiskAssessment => "RiskAssessment",
            AnalysisType::DeadlineExtraction => "DeadlineExtraction",
            AnalysisType::MovementDigest => "MovementDigest",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "casesummary" | "case_summary" | "summary" => Ok(AnalysisType::CaseSummary),
            "riskassessment" | "risk_assessment" | "risk" => Ok(AnalysisType::RiskAssessment),
            "deadlineextraction" | "deadline_extraction" | "deadlines" => {
                Ok(AnalysisType::DeadlineExtraction)
            }
            "movementdigest" | "movement_digest" | "movements" => Ok(AnalysisType::MovementDigest),
            _ => Err(EnumParseError::new("analysis type", s)),
        }
    }

    /// The model tier this analysis runs on unless overridden.
    pub fn default_tier(&self) -> ModelTier {
        match self {
            AnalysisType::MovementDigest | AnalysisType::DeadlineExtraction => ModelTier::Fast,
            AnalysisType::CaseSummary => ModelTier::Standard,
            AnalysisType::RiskAssessment => ModelTier::Deep,
        }
    }
}

impl_db_str_traits!(AnalysisType);

// ============================================================================
// MODEL TIER
// ============================================================================

/// Capability/cost tier of the model used for an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelTier {
    Fast,
    Standard,
    Deep,
}

impl ModelTier {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "Fast",
            ModelTier::Standard => "Standard",
            ModelTier::Deep => "Deep",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(ModelTier::Fast),
            "standard" => Ok(ModelTier::Standard),
            "deep" => Ok(ModelTier::Deep),
            _ => Err(EnumParseError::new("model tier", s)),
        }
    }
}

impl_db_str_traits!(ModelTier);

// ============================================================================
// VERSION STATUS
// ============================================================================

/// Lifecycle of an analysis version.
///
/// ```text
/// Pending ──┬── Completed (terminal)
///           └── Failed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionStatus {
    Pending,
    Completed,
    Failed,
}

impl VersionStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            VersionStatus::Pending => "Pending",
            VersionStatus::Completed => "Completed",
            VersionStatus::Failed => "Failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(VersionStatus::Pending),
            "completed" | "complete" => Ok(VersionStatus::Completed),
            "failed" | "failure" => Ok(VersionStatus::Failed),
            _ => Err(EnumParseError::new("version status", s)),
        }
    }

    /// Check if this is a terminal state (the version is immutable).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VersionStatus::Completed | VersionStatus::Failed)
    }

    /// Check whether a transition to `next` is permitted.
    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        matches!(
            (self, next),
            (VersionStatus::Pending, VersionStatus::Completed)
                | (VersionStatus::Pending, VersionStatus::Failed)
        )
    }
}

impl_db_str_traits!(VersionStatus);

// ============================================================================
// JOB STATUS
// ============================================================================

/// Lifecycle of an analysis job.
///
/// ```text
/// Queued ── dequeue ──→ Running ──┬── Completed (terminal)
///   │                             └── Failed (terminal)
///   └──────────── fail ─────────────→ Failed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" | "in_progress" | "inprogress" => Ok(JobStatus::Running),
            "completed" | "complete" => Ok(JobStatus::Completed),
            "failed" | "failure" => Ok(JobStatus::Failed),
            _ => Err(EnumParseError::new("job status", s)),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Check whether a transition to `next` is permitted.
    ///
    /// A queued job may fail without ever running (enqueue failure or an
    /// out-of-band sweep); completion always goes through `Running`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl_db_str_traits!(JobStatus);
