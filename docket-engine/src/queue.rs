//! Job-queue transport seam.
//!
//! Production deployments hand [`JobMessage`]s to an external broker with
//! at-least-once delivery. [`InMemoryJobQueue`] is a tokio channel with the
//! same contract for tests and single-process deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docket_core::{DocketResult, JobMessage, QueueError};
use tokio::sync::{mpsc, Mutex};

/// Accepts jobs for background execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, message: JobMessage) -> DocketResult<()>;
}

/// Channel-backed [`JobQueue`].
#[derive(Debug)]
pub struct InMemoryJobQueue {
    sender: mpsc::UnboundedSender<JobMessage>,
    enqueued: AtomicU64,
}

/// Consuming end of an [`InMemoryJobQueue`]. Clones share one channel, so
/// each message goes to exactly one consumer.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::UnboundedReceiver<JobMessage>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                enqueued: AtomicU64::new(0),
            },
            JobReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// Messages accepted so far, redeliveries included.
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, message: JobMessage) -> DocketResult<()> {
        self.sender.send(message).map_err(|_| QueueError::Closed)?;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl JobReceiver {
    /// Next message, or `None` once every sender is gone and the channel
    /// is drained.
    pub async fn recv(&self) -> Option<JobMessage> {
        self.inner.lock().await.recv().await
    }

    /// Next message if one is ready.
    pub async fn try_recv(&self) -> Option<JobMessage> {
        self.inner.lock().await.try_recv().ok()
    }
}
