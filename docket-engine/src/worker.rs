//! Worker loop.
//!
//! Pulls [`JobMessage`]s off a [`JobReceiver`] and hands each one to the
//! executor until shutdown is signalled or the queue closes. A job in
//! progress when shutdown arrives is finished first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docket_core::JobMessage;
use tokio::sync::watch;

use crate::executor::{AnalysisExecutor, ExecutionOutcome};
use crate::queue::JobReceiver;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for one worker's lifetime.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    /// Jobs that reached COMPLETED.
    pub jobs_completed: AtomicU64,

    /// Jobs that ended in an error (recorded as FAILED where possible).
    pub jobs_failed: AtomicU64,

    /// Deliveries that were no-ops (duplicate, stale or already finished).
    pub jobs_skipped: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_skipped: self.jobs_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of worker metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
}

impl WorkerSnapshot {
    pub fn total(&self) -> u64 {
        self.jobs_completed + self.jobs_failed + self.jobs_skipped
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Consumes jobs and runs them through an [`AnalysisExecutor`].
pub struct Worker {
    executor: Arc<AnalysisExecutor>,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    pub fn new(executor: Arc<AnalysisExecutor>) -> Self {
        Self {
            executor,
            metrics: Arc::new(WorkerMetrics::new()),
        }
    }

    /// Live view of this worker's counters.
    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Process jobs until `shutdown_rx` turns `true`, its sender is dropped,
    /// or the queue closes.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (shutdown_tx, shutdown_rx) = watch::channel(false);
    /// let handle = tokio::spawn(Worker::new(executor).run(receiver, shutdown_rx));
    ///
    /// let _ = shutdown_tx.send(true);
    /// let metrics = handle.await?;
    /// ```
    pub async fn run(
        self,
        receiver: JobReceiver,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<WorkerMetrics> {
        tracing::info!("Analysis worker started");

        if !*shutdown_rx.borrow() {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("Analysis worker shutting down");
                            break;
                        }
                    }

                    message = receiver.recv() => {
                        match message {
                            Some(message) => self.handle(message).await,
                            None => {
                                tracing::info!("Job queue closed, analysis worker stopping");
                                break;
                            }
                        }
                    }
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            jobs_completed = snapshot.jobs_completed,
            jobs_failed = snapshot.jobs_failed,
            jobs_skipped = snapshot.jobs_skipped,
            "Analysis worker stopped"
        );

        self.metrics
    }

    async fn handle(&self, message: JobMessage) {
        match self.executor.execute(&message).await {
            Ok(ExecutionOutcome::Completed { version_id }) => {
                self.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(job_id = %message.job_id, version_id = %version_id, "Job done");
            }
            Ok(ExecutionOutcome::Skipped { reason }) => {
                self.metrics.jobs_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(job_id = %message.job_id, reason = ?reason, "Job skipped");
            }
            Err(e) => {
                self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, job_id = %message.job_id, "Job failed");
            }
        }
    }
}
