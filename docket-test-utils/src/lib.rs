//! Docket Test Utilities
//!
//! Shared test infrastructure for the docket workspace:
//! - Proptest generators for ids, document sets and timestamps
//! - Fixtures for common records
//! - Custom assertions on `DocketResult`
//! - [`TestHarness`], an engine wired entirely to in-memory collaborators

use std::sync::Arc;

use chrono::Utc;
use docket_engine::{
    AnalysisEngine, AnalysisExecutor, AnalysisOutcome, AnalysisRequest, EngineComponents,
    ExecutionOutcome, InMemoryDocumentStore, InMemoryJobQueue, JobReceiver,
};
use docket_lock::{DistributedLock, InMemoryKvStore};
use docket_llm::{MockAnalysisProvider, ProviderRegistry};
use docket_storage::{
    CacheStore, InMemoryActivityLog, InMemoryAnalysisRepository, InMemoryCacheBackend,
};

// Re-export core types for convenience
pub use docket_core::{
    AnalysisJob, AnalysisType, AnalysisVersion, CaseId, DocketError, DocketResult, DocumentId,
    DocumentRef, EngineConfig, EntityIdType, JobId, JobStatus, RecordKind, StateError,
    StorageError, Timestamp, ValidationError, VersionStatus,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for docket inputs.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random non-nil UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>()
            .prop_filter("nil uuid", |b| b.iter().any(|x| *x != 0))
            .prop_map(Uuid::from_bytes)
    }

    /// Generate a random CaseId.
    pub fn arb_case_id() -> impl Strategy<Value = CaseId> {
        arb_uuid().prop_map(CaseId::new)
    }

    /// Generate a random DocumentId.
    pub fn arb_document_id() -> impl Strategy<Value = DocumentId> {
        arb_uuid().prop_map(DocumentId::new)
    }

    /// Generate a 64-char lowercase hex content hash.
    pub fn arb_content_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    /// Generate a Timestamp between 2020 and 2030, whole milliseconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800_000i64..1_893_456_000_000i64).prop_map(|millis| {
            chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
        })
    }

    /// Generate an optional activity timestamp.
    pub fn arb_activity() -> impl Strategy<Value = Option<Timestamp>> {
        prop::option::of(arb_timestamp())
    }

    /// Generate an AnalysisType variant.
    pub fn arb_analysis_type() -> impl Strategy<Value = AnalysisType> {
        prop::sample::select(AnalysisType::ALL.to_vec())
    }

    /// Generate a DocumentRef.
    pub fn arb_document() -> impl Strategy<Value = DocumentRef> {
        (arb_document_id(), arb_content_hash(), 1u64..10_000_000)
            .prop_map(|(id, hash, size)| DocumentRef::new(id, hash, size))
    }

    /// Generate a non-empty document set with distinct ids.
    pub fn arb_document_set() -> impl Strategy<Value = Vec<DocumentRef>> {
        prop::collection::vec(arb_document(), 1..8).prop_map(|mut docs| {
            docs.sort_by_key(|d| d.document_id);
            docs.dedup_by_key(|d| d.document_id);
            docs
        })
    }

    /// Generate a document hash set together with one shuffled copy.
    pub fn arb_hashes_and_permutation() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
        prop::collection::vec(arb_content_hash(), 0..12).prop_flat_map(|hashes| {
            let original = hashes.clone();
            Just(hashes)
                .prop_shuffle()
                .prop_map(move |shuffled| (original.clone(), shuffled))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::time::Duration;

    /// Configuration with short TTLs, suitable for tests that sleep.
    pub fn fast_config() -> EngineConfig {
        EngineConfig::default()
            .with_cache_ttl(Duration::from_secs(60))
            .with_lock_ttl(Duration::from_secs(5))
    }

    /// Document with a synthetic hash derived from `seed`.
    pub fn document(seed: &str) -> DocumentRef {
        DocumentRef::new(
            DocumentId::now_v7(),
            format!("sha256-{}", seed),
            seed.len() as u64 * 1024,
        )
    }

    /// Three documents with hashes `{a, b, c}`.
    pub fn three_documents() -> Vec<DocumentRef> {
        ["a", "b", "c"].into_iter().map(document).collect()
    }

    /// Request for a case summary over `documents`.
    pub fn summary_request(case_id: CaseId, documents: Vec<DocumentRef>) -> AnalysisRequest {
        AnalysisRequest::new(case_id, AnalysisType::CaseSummary, documents)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on `DocketResult` and engine outcomes.

    use super::*;

    /// Assert that a DocketResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &DocketResult<T>) {
        match result {
            Err(DocketError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a DocketResult is a NotFound storage error for `kind`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &DocketResult<T>, kind: RecordKind) {
        match result {
            Err(DocketError::Storage(StorageError::NotFound { kind: k, .. })) => {
                assert_eq!(*k, kind, "Wrong record kind in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", kind, other),
        }
    }

    /// Assert that a DocketResult is a State error.
    #[track_caller]
    pub fn assert_state_error<T: std::fmt::Debug>(result: &DocketResult<T>) {
        match result {
            Err(DocketError::State(_)) => {}
            other => panic!("Expected State error, got: {:?}", other),
        }
    }

    /// Unwrap a `Queued` outcome into `(version, job_id)`.
    #[track_caller]
    pub fn expect_queued(outcome: AnalysisOutcome) -> (AnalysisVersion, JobId) {
        match outcome {
            AnalysisOutcome::Queued { version, job_id } => (version, job_id),
            other => panic!("Expected queued, got: {:?}", other),
        }
    }

    /// Unwrap a `Cached` outcome into its version.
    #[track_caller]
    pub fn expect_cached(outcome: AnalysisOutcome) -> AnalysisVersion {
        match outcome {
            AnalysisOutcome::Cached { version } => version,
            other => panic!("Expected cached, got: {:?}", other),
        }
    }

    /// Unwrap a `Busy` outcome into its wait hint.
    #[track_caller]
    pub fn expect_busy(outcome: AnalysisOutcome) -> u64 {
        match outcome {
            AnalysisOutcome::Busy { wait_hint_seconds } => wait_hint_seconds,
            other => panic!("Expected busy, got: {:?}", other),
        }
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// An [`AnalysisEngine`] and [`AnalysisExecutor`] sharing in-memory
/// collaborators, with handles to every one of them.
pub struct TestHarness {
    pub engine: Arc<AnalysisEngine>,
    pub executor: Arc<AnalysisExecutor>,
    pub repository: Arc<InMemoryAnalysisRepository>,
    pub cache_backend: Arc<InMemoryCacheBackend>,
    pub cache: Arc<CacheStore>,
    pub activity: Arc<InMemoryActivityLog>,
    pub kv: Arc<InMemoryKvStore>,
    pub lock: DistributedLock,
    pub queue: Arc<InMemoryJobQueue>,
    pub receiver: JobReceiver,
    pub documents: Arc<InMemoryDocumentStore>,
    pub provider: Arc<MockAnalysisProvider>,
}

impl TestHarness {
    /// Harness with [`fixtures::fast_config`] and a default mock provider.
    pub fn new() -> DocketResult<Self> {
        Self::build(fixtures::fast_config(), MockAnalysisProvider::new())
    }

    /// Harness with a custom configuration and provider.
    pub fn build(config: EngineConfig, provider: MockAnalysisProvider) -> DocketResult<Self> {
        let repository = Arc::new(InMemoryAnalysisRepository::new());
        let cache_backend = Arc::new(InMemoryCacheBackend::new());
        let activity = Arc::new(InMemoryActivityLog::new());
        let cache = Arc::new(CacheStore::new(cache_backend.clone(), activity.clone()));
        let kv = Arc::new(InMemoryKvStore::new());
        let lock = DistributedLock::new(kv.clone());
        let (queue, receiver) = InMemoryJobQueue::new();
        let queue = Arc::new(queue);
        let documents = Arc::new(InMemoryDocumentStore::new());
        let provider = Arc::new(provider);

        let engine = AnalysisEngine::new(
            config.clone(),
            EngineComponents {
                repository: repository.clone(),
                cache: cache.clone(),
                oracle: activity.clone(),
                lock: lock.clone(),
                queue: queue.clone(),
            },
        )?;

        let mut providers = ProviderRegistry::new();
        providers.register_default(provider.clone());
        let executor = AnalysisExecutor::new(
            engine.orchestrator(),
            repository.clone(),
            documents.clone(),
            providers,
            lock.clone(),
            config,
        );

        Ok(Self {
            engine: Arc::new(engine),
            executor: Arc::new(executor),
            repository,
            cache_backend,
            cache,
            activity,
            kv,
            lock,
            queue,
            receiver,
            documents,
            provider,
        })
    }

    /// Register `documents` for `case_id` with synthetic extracted text.
    pub async fn attach(&self, case_id: CaseId, documents: &[DocumentRef]) {
        for doc in documents {
            self.documents
                .add_document(
                    case_id,
                    doc.clone(),
                    format!("Extracted text of {}", doc.content_hash),
                )
                .await;
        }
    }

    /// Attach documents and request a case summary over them.
    pub async fn request_summary(
        &self,
        case_id: CaseId,
        documents: Vec<DocumentRef>,
    ) -> DocketResult<AnalysisOutcome> {
        self.attach(case_id, &documents).await;
        self.engine
            .request_analysis(&fixtures::summary_request(case_id, documents))
            .await
    }

    /// Record new case activity now.
    pub async fn record_activity(&self, case_id: CaseId) -> Timestamp {
        self.activity.record_now(case_id, "movement").await
    }

    /// Record case activity one second after the case's latest, so the
    /// analysis key is guaranteed to change even within one millisecond.
    pub async fn bump_activity(&self, case_id: CaseId) -> Timestamp {
        let events = self.activity.events_for(case_id).await;
        let at = events
            .iter()
            .map(|e| e.occurred_at)
            .max()
            .map(|latest| latest + chrono::Duration::seconds(1))
            .unwrap_or_else(Utc::now);
        self.activity.record_activity(case_id, "movement", at).await
    }

    /// Execute every message currently queued, in order.
    pub async fn run_pending(&self) -> Vec<DocketResult<ExecutionOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(message) = self.receiver.try_recv().await {
            outcomes.push(self.executor.execute(&message).await);
        }
        outcomes
    }
}
