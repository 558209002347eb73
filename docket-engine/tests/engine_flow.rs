use std::sync::Arc;

use async_trait::async_trait;
use docket_core::{
    AnalysisType, CaseId, DocketError, DocketResult, EntityIdType, JobId, JobMessage, JobStatus,
    LlmError, LockError, QueueError, RecordKind, StorageError, Timestamp, VersionStatus,
};
use docket_engine::{
    AnalysisEngine, AnalysisOutcome, AnalysisRequest, EngineComponents, ExecutionOutcome,
    JobQueue, SkipReason,
};
use docket_llm::MockAnalysisProvider;
use docket_storage::ActivityOracle;
use docket_test_utils::assertions::{
    assert_not_found, assert_validation_error, expect_busy, expect_cached, expect_queued,
};
use docket_test_utils::fixtures::{self, document, three_documents};
use docket_test_utils::TestHarness;

fn timeout_error() -> LlmError {
    LlmError::Timeout {
        provider: "mock".to_string(),
        elapsed_ms: 30_000,
    }
}

#[tokio::test]
async fn fresh_analysis_is_queued_then_cached() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();

    let (version, job_id) = expect_queued(h.request_summary(case_id, docs.clone()).await.unwrap());
    assert_eq!(version.version_number, 1);
    assert_eq!(version.status, VersionStatus::Pending);

    let job = h.engine.get_job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.documents, docs);
    assert!(job.lock_token.is_some());

    let outcomes = h.run_pending().await;
    assert!(matches!(
        outcomes.as_slice(),
        [Ok(ExecutionOutcome::Completed { version_id })] if *version_id == version.version_id
    ));

    let job = h.engine.get_job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);

    let cached = expect_cached(h.request_summary(case_id, docs).await.unwrap());
    assert_eq!(cached.version_id, version.version_id);
    assert_eq!(cached.status, VersionStatus::Completed);
    assert!(cached.result.is_some());
    assert_eq!(h.provider.call_count(), 1);

    let latest = h.engine.get_latest_version(case_id, None).await.unwrap();
    assert_eq!(latest.map(|v| v.version_id), Some(version.version_id));
}

#[tokio::test]
async fn document_order_does_not_change_the_key() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();
    let mut reversed = docs.clone();
    reversed.reverse();

    expect_queued(h.request_summary(case_id, docs).await.unwrap());
    h.run_pending().await;
    expect_cached(h.request_summary(case_id, reversed).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_queue_one_job() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();
    h.attach(case_id, &docs).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let request = fixtures::summary_request(case_id, docs.clone());
        handles.push(tokio::spawn(async move {
            engine.request_analysis(&request).await.unwrap()
        }));
    }

    let mut queued = 0;
    let mut busy = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AnalysisOutcome::Queued { .. } => queued += 1,
            AnalysisOutcome::Busy { wait_hint_seconds } => {
                assert!(wait_hint_seconds >= 1);
                assert!(wait_hint_seconds <= 5);
                busy += 1;
            }
            AnalysisOutcome::Cached { .. } => panic!("nothing is cached yet"),
        }
    }
    assert_eq!(queued, 1);
    assert_eq!(busy, 7);
    assert_eq!(h.repository.version_count().await, 1);
    assert_eq!(h.repository.job_count().await, 1);
}

#[tokio::test]
async fn two_simultaneous_requests_one_busy() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();
    h.attach(case_id, &docs).await;
    let request = fixtures::summary_request(case_id, docs);

    let (a, b) = tokio::join!(
        h.engine.request_analysis(&request),
        h.engine.request_analysis(&request)
    );
    let mut statuses = [a.unwrap().status(), b.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, ["busy", "queued"]);
}

#[tokio::test]
async fn identical_documents_in_two_cases_stay_separate() {
    let h = TestHarness::new().unwrap();
    let first = CaseId::now_v7();
    let second = CaseId::now_v7();
    let docs = three_documents();

    let (v1, _) = expect_queued(h.request_summary(first, docs.clone()).await.unwrap());
    h.run_pending().await;

    let (v2, _) = expect_queued(h.request_summary(second, docs.clone()).await.unwrap());
    assert_eq!(v2.case_id, second);
    assert_eq!(v2.version_number, 1);
    assert_ne!(v1.analysis_key, v2.analysis_key);
    h.run_pending().await;

    let cached = expect_cached(h.request_summary(second, docs).await.unwrap());
    assert_eq!(cached.version_id, v2.version_id);
    assert_eq!(h.engine.list_versions(first).await.unwrap().len(), 1);
    assert_eq!(h.engine.list_versions(second).await.unwrap().len(), 1);
    assert_eq!(h.provider.call_count(), 2);
}

#[tokio::test]
async fn concurrent_requests_for_different_cases_both_queue() {
    let h = TestHarness::new().unwrap();
    let docs = three_documents();
    let (a, b) = (CaseId::now_v7(), CaseId::now_v7());
    h.attach(a, &docs).await;
    h.attach(b, &docs).await;

    let req_a = fixtures::summary_request(a, docs.clone());
    let req_b = fixtures::summary_request(b, docs.clone());
    let (ra, rb) = tokio::join!(
        h.engine.request_analysis(&req_a),
        h.engine.request_analysis(&req_b)
    );
    assert_eq!(ra.unwrap().status(), "queued");
    assert_eq!(rb.unwrap().status(), "queued");
}

#[tokio::test]
async fn new_activity_invalidates_cached_result() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();

    let (v1, _) = expect_queued(h.request_summary(case_id, docs.clone()).await.unwrap());
    h.run_pending().await;
    expect_cached(h.request_summary(case_id, docs.clone()).await.unwrap());

    h.bump_activity(case_id).await;

    let (v2, _) = expect_queued(h.request_summary(case_id, docs).await.unwrap());
    assert_ne!(v1.analysis_key, v2.analysis_key);
    assert_eq!(v2.version_number, 2);
}

#[tokio::test]
async fn failed_jobs_are_never_cached() {
    let h = TestHarness::build(
        fixtures::fast_config(),
        MockAnalysisProvider::new().with_script([Err(timeout_error())]),
    )
    .unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();

    let (v1, job_id) = expect_queued(h.request_summary(case_id, docs.clone()).await.unwrap());
    let outcomes = h.run_pending().await;
    assert!(matches!(
        outcomes.as_slice(),
        [Err(DocketError::Llm(LlmError::Timeout { .. }))]
    ));

    let job = h.engine.get_job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
    let versions = h.engine.list_versions(case_id).await.unwrap();
    assert_eq!(versions[0].status, VersionStatus::Failed);
    assert!(h.engine.get_latest_version(case_id, None).await.unwrap().is_none());

    // Same key, lock released, nothing cached: recompute from scratch.
    let (v2, _) = expect_queued(h.request_summary(case_id, docs).await.unwrap());
    assert_eq!(v2.analysis_key, v1.analysis_key);
    assert_eq!(v2.version_number, 2);
    assert_eq!(h.cache.stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn provider_timing_and_model_are_recorded() {
    let h = TestHarness::build(
        fixtures::fast_config(),
        MockAnalysisProvider::new().with_script([Ok(docket_llm::Completion {
            content: serde_json::json!({"summary": "two filings"}),
            tokens_used: 120,
            confidence: 0.75,
            model_used: "summary-model-7".to_string(),
            duration_ms: 1234,
        })]),
    )
    .unwrap();
    let case_id = CaseId::now_v7();

    expect_queued(h.request_summary(case_id, three_documents()).await.unwrap());
    h.run_pending().await;

    let version = h.engine.get_latest_version(case_id, None).await.unwrap().unwrap();
    assert_eq!(version.processing_time_ms, Some(1234));
    assert_eq!(version.model_used, "summary-model-7");
    assert_eq!(version.confidence, Some(0.75));
    let result = version.result.unwrap();
    assert_eq!(result.tokens_used, 120);
    assert_eq!(result.model_used.as_deref(), Some("summary-model-7"));
}

#[tokio::test]
async fn malformed_completion_fails_the_job() {
    let h = TestHarness::build(
        fixtures::fast_config(),
        MockAnalysisProvider::new().with_script([Ok(docket_llm::Completion {
            content: serde_json::json!({"summary": "x"}),
            tokens_used: 10,
            confidence: 7.0,
            model_used: "m".to_string(),
            duration_ms: 5,
        })]),
    )
    .unwrap();
    let case_id = CaseId::now_v7();

    let (version, _) = expect_queued(h.request_summary(case_id, three_documents()).await.unwrap());
    let outcomes = h.run_pending().await;
    assert!(matches!(
        outcomes.as_slice(),
        [Err(DocketError::Llm(LlmError::InvalidResponse { .. }))]
    ));
    let stored = h
        .engine
        .list_versions(case_id)
        .await
        .unwrap()
        .into_iter()
        .find(|v| v.version_id == version.version_id)
        .unwrap();
    assert_eq!(stored.status, VersionStatus::Failed);
}

#[tokio::test]
async fn version_numbers_increase_without_gaps() {
    let h = TestHarness::build(
        fixtures::fast_config(),
        MockAnalysisProvider::new(),
    )
    .unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();

    for round in 0..6 {
        if round % 3 == 1 {
            h.provider.push_failure(timeout_error()).await;
        }
        h.bump_activity(case_id).await;
        expect_queued(h.request_summary(case_id, docs.clone()).await.unwrap());
        h.run_pending().await;
    }

    let numbers: Vec<i32> = h
        .engine
        .list_versions(case_id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.version_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_work() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();

    assert_validation_error(&h.request_summary(case_id, Vec::new()).await);
    assert_validation_error(&h.request_summary(CaseId::nil(), three_documents()).await);
    let blank_model = fixtures::summary_request(case_id, three_documents()).with_model_version(" ");
    assert_validation_error(&h.engine.request_analysis(&blank_model).await);

    assert_eq!(h.repository.version_count().await, 0);
    assert_eq!(h.queue.enqueued_count(), 0);
}

#[tokio::test]
async fn lock_store_outage_fails_open() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();
    h.kv.set_available(false);

    let (_, job_id) = expect_queued(h.request_summary(case_id, docs.clone()).await.unwrap());
    let job = h.engine.get_job_status(job_id).await.unwrap();
    assert!(job.lock_token.is_none());
    assert!(job.lock_key.is_none());

    h.run_pending().await;
    expect_cached(h.request_summary(case_id, docs).await.unwrap());
}

#[tokio::test]
async fn lock_store_outage_fails_closed_when_configured() {
    let h = TestHarness::build(
        fixtures::fast_config().with_lock_fail_open(false),
        MockAnalysisProvider::new(),
    )
    .unwrap();
    h.kv.set_available(false);

    let result = h
        .request_summary(CaseId::now_v7(), three_documents())
        .await;
    assert!(matches!(
        result,
        Err(DocketError::Lock(LockError::Unreachable { .. }))
    ));
    assert_eq!(h.repository.version_count().await, 0);
}

#[tokio::test]
async fn redelivered_jobs_are_skipped() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let (_, job_id) = expect_queued(h.request_summary(case_id, three_documents()).await.unwrap());

    let job = h.engine.get_job_status(job_id).await.unwrap();
    let message = JobMessage::from(&job);
    h.run_pending().await;

    let again = h.executor.execute(&message).await.unwrap();
    assert_eq!(
        again,
        ExecutionOutcome::Skipped {
            reason: SkipReason::AlreadyTerminal(JobStatus::Completed)
        }
    );
    assert_eq!(h.provider.call_count(), 1);
}

#[tokio::test]
async fn delivery_with_wrong_token_is_skipped() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let (_, job_id) = expect_queued(h.request_summary(case_id, three_documents()).await.unwrap());

    let job = h.engine.get_job_status(job_id).await.unwrap();
    let mut forged = JobMessage::from(&job);
    forged.lock_token = Some("someone-else".to_string());

    let outcome = h.executor.execute(&forged).await.unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Skipped {
            reason: SkipReason::StaleDelivery
        }
    );
    let job = h.engine.get_job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}

#[tokio::test]
async fn missing_document_text_fails_the_job() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let request = fixtures::summary_request(case_id, vec![document("unattached")]);

    let (_, job_id) = expect_queued(h.engine.request_analysis(&request).await.unwrap());
    let outcomes = h.run_pending().await;
    assert_eq!(outcomes.len(), 1);
    assert_not_found(&outcomes[0], RecordKind::Document);

    let job = h.engine.get_job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.provider.call_count(), 0);
}

#[tokio::test]
async fn dangling_cache_entry_is_a_miss() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();
    let request = fixtures::summary_request(case_id, docs.clone());
    let key = h.engine.analysis_key_for(&request).await.unwrap();

    h.cache
        .put(
            &key,
            case_id,
            docket_core::VersionId::now_v7(),
            std::time::Duration::from_secs(60),
            None,
        )
        .await
        .unwrap();

    expect_queued(h.request_summary(case_id, docs).await.unwrap());
    assert_eq!(h.cache.stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn model_version_and_type_are_part_of_the_key() {
    let h = TestHarness::new().unwrap();
    let case_id = CaseId::now_v7();
    let docs = three_documents();

    let (base, _) = expect_queued(h.request_summary(case_id, docs.clone()).await.unwrap());
    h.run_pending().await;

    let other_model = fixtures::summary_request(case_id, docs.clone()).with_model_version("analysis-deep-2");
    let (by_model, _) = expect_queued(h.engine.request_analysis(&other_model).await.unwrap());
    assert_eq!(by_model.model_used, "analysis-deep-2");

    let risk = AnalysisRequest::new(case_id, AnalysisType::RiskAssessment, docs);
    let (by_type, _) = expect_queued(h.engine.request_analysis(&risk).await.unwrap());

    assert_ne!(base.analysis_key, by_model.analysis_key);
    assert_ne!(base.analysis_key, by_type.analysis_key);
    h.run_pending().await;

    let latest_risk = h
        .engine
        .get_latest_version(case_id, Some(AnalysisType::RiskAssessment))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest_risk.version_id, by_type.version_id);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = TestHarness::new().unwrap();
    assert_not_found(&h.engine.get_job_status(JobId::now_v7()).await, RecordKind::Job);
}

struct RejectingQueue;

#[async_trait]
impl JobQueue for RejectingQueue {
    async fn enqueue(&self, _message: JobMessage) -> DocketResult<()> {
        Err(QueueError::EnqueueFailed {
            reason: "broker down".to_string(),
        }
        .into())
    }
}

#[tokio::test]
async fn enqueue_failure_fails_job_and_frees_the_lock() {
    let h = TestHarness::new().unwrap();
    let engine = AnalysisEngine::new(
        fixtures::fast_config(),
        EngineComponents {
            repository: h.repository.clone(),
            cache: h.cache.clone(),
            oracle: h.activity.clone(),
            lock: h.lock.clone(),
            queue: Arc::new(RejectingQueue),
        },
    )
    .unwrap();
    let case_id = CaseId::now_v7();
    let request = fixtures::summary_request(case_id, three_documents());

    let err = engine.request_analysis(&request).await.unwrap_err();
    assert!(matches!(err, DocketError::Queue(QueueError::EnqueueFailed { .. })));

    let versions = engine.list_versions(case_id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].status, VersionStatus::Failed);

    let key = engine.analysis_key_for(&request).await.unwrap();
    assert!(h.kv.get(&key.lock_key()).await.is_none());
}

struct UnreachableOracle;

#[async_trait]
impl ActivityOracle for UnreachableOracle {
    async fn last_activity_for(&self, _case_id: CaseId) -> DocketResult<Option<Timestamp>> {
        Err(StorageError::Unavailable {
            reason: "activity store down".to_string(),
        }
        .into())
    }
}

#[tokio::test]
async fn activity_oracle_failure_is_returned() {
    let h = TestHarness::new().unwrap();
    let engine = AnalysisEngine::new(
        fixtures::fast_config(),
        EngineComponents {
            repository: h.repository.clone(),
            cache: h.cache.clone(),
            oracle: Arc::new(UnreachableOracle),
            lock: h.lock.clone(),
            queue: h.queue.clone(),
        },
    )
    .unwrap();
    let case_id = CaseId::now_v7();

    let err = engine
        .request_analysis(&fixtures::summary_request(case_id, three_documents()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DocketError::Storage(StorageError::Unavailable { .. })
    ));
    assert_eq!(h.repository.version_count().await, 0);
    assert_eq!(h.queue.enqueued_count(), 0);
}
