use super::JobEnvelope;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue closed")]
    Closed,
}

/// Durable-queue port with delayed re-enqueue. At-least-once: a popped
/// envelope that is never finished is simply lost work to be re-observed on
/// the next ingest cycle, while a re-enqueued one may be delivered alongside
/// its duplicate.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError>;

    /// Make the envelope visible no earlier than `delay` from now.
    async fn enqueue_in(&self, delay: Duration, envelope: JobEnvelope) -> Result<(), QueueError>;

    /// Wait up to `wait` for an envelope; `None` on timeout.
    async fn dequeue(&self, wait: Duration) -> Result<Option<JobEnvelope>, QueueError>;
}

/// In-process queue over an unbounded channel. Backs tests and single-process
/// deployments; delayed envelopes ride a timer task.
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<JobEnvelope>,
    rx: Mutex<mpsc::UnboundedReceiver<JobEnvelope>>,
}

impl fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueue").finish()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError> {
        debug!(job = envelope.job.name(), id = %envelope.id, "enqueue");
        self.tx.send(envelope).map_err(|_| QueueError::Closed)
    }

    async fn enqueue_in(&self, delay: Duration, envelope: JobEnvelope) -> Result<(), QueueError> {
        debug!(
            job = envelope.job.name(),
            id = %envelope.id,
            delay_secs = delay.as_secs(),
            "delayed enqueue"
        );
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(envelope);
        });
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<JobEnvelope>, QueueError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }
}
