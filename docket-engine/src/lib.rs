//! Docket Engine - Analysis Coordination
//!
//! Decides whether an expensive analysis of a case must be recomputed, makes
//! sure at most one computation runs per analysis key, and tracks every
//! computation as a numbered version with a job driving it.
//!
//! # Flow
//!
//! ```text
//! request_analysis ─→ derive key ─→ cache hit? ── yes ──→ Cached
//!                                      │ no
//!                                  acquire lock ── busy ──→ Busy { wait_hint }
//!                                      │ acquired
//!                              version + job ─→ enqueue ──→ Queued
//!
//! Worker ─→ AnalysisExecutor::execute ─→ Running ─→ Completed (cached) | Failed
//! ```

pub mod documents;
pub mod engine;
pub mod executor;
pub mod orchestrator;
pub mod purge;
pub mod queue;
pub mod telemetry;
pub mod worker;

pub use documents::{DocumentStore, InMemoryDocumentStore};
pub use engine::{AnalysisEngine, AnalysisOutcome, AnalysisRequest, EngineComponents};
pub use executor::{AnalysisExecutor, ExecutionOutcome, SkipReason};
pub use orchestrator::VersionOrchestrator;
pub use purge::{cache_purge_task, CachePurgeMetrics, CachePurgeSnapshot};
pub use queue::{InMemoryJobQueue, JobQueue, JobReceiver};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, DEFAULT_LOG_FILTER};
pub use worker::{Worker, WorkerMetrics, WorkerSnapshot};
