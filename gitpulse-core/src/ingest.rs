//! One ingest cycle: list public events, keep the pushes, queue the work.

use crate::error::Result;
use crate::github::{ApiError, GithubApi};
use crate::jobs::{Job, JobEnvelope, JobQueue};
use std::fmt;
use std::sync::Arc;
use tracing::info;

const PUSH_EVENT_TYPE: &str = "PushEvent";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub events_fetched: usize,
    pub jobs_enqueued: usize,
}

pub struct Ingestor {
    api: Arc<dyn GithubApi>,
    queue: Arc<dyn JobQueue>,
}

impl fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor").finish()
    }
}

impl Ingestor {
    pub fn new(api: Arc<dyn GithubApi>, queue: Arc<dyn JobQueue>) -> Self {
        Self { api, queue }
    }

    /// Fetch the public listing and enqueue a handle-event job per push
    /// event. An unchanged stream (304) is a successful empty cycle; every
    /// other failure propagates to the worker loop.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let events = match self.api.list_public_events().await {
            Ok(events) => events,
            Err(ApiError::NotModified) => {
                info!("event stream unchanged since last cycle");
                return Ok(CycleStats::default());
            }
            Err(e) => return Err(e.into()),
        };

        let events_fetched = events.len();
        let mut jobs_enqueued = 0;
        for event in events {
            if event.data.kind.as_deref() != Some(PUSH_EVENT_TYPE) {
                continue;
            }
            self.queue
                .enqueue(JobEnvelope::new(Job::HandleEvent { raw: event.raw }))
                .await?;
            jobs_enqueued += 1;
        }

        info!(events_fetched, jobs_enqueued, "ingest cycle complete");
        Ok(CycleStats {
            events_fetched,
            jobs_enqueued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{EventData, MockGithubApi, RawEvent};
    use crate::jobs::MemoryQueue;
    use std::time::Duration;

    fn raw_event(id: &str, kind: &str) -> RawEvent {
        let raw = format!(r#"{{"id":"{id}","type":"{kind}"}}"#);
        let data: EventData = serde_json::from_str(&raw).unwrap();
        RawEvent { raw, data }
    }

    #[tokio::test]
    async fn enqueues_only_push_events() {
        let mut api = MockGithubApi::new();
        api.expect_list_public_events().returning(|| {
            Ok(vec![
                raw_event("e1", "PushEvent"),
                raw_event("e2", "WatchEvent"),
                raw_event("e3", "PushEvent"),
            ])
        });
        let queue = Arc::new(MemoryQueue::new());
        let ingestor = Ingestor::new(Arc::new(api), queue.clone());

        let stats = ingestor.run_cycle().await.unwrap();
        assert_eq!(
            stats,
            CycleStats {
                events_fetched: 3,
                jobs_enqueued: 2,
            }
        );

        let first = queue
            .dequeue(Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        match first.job {
            Job::HandleEvent { raw } => assert!(raw.contains(r#""id":"e1""#)),
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_modified_is_an_empty_cycle() {
        let mut api = MockGithubApi::new();
        api.expect_list_public_events()
            .returning(|| Err(ApiError::NotModified));
        let queue = Arc::new(MemoryQueue::new());
        let ingestor = Ingestor::new(Arc::new(api), queue.clone());

        let stats = ingestor.run_cycle().await.unwrap();
        assert_eq!(stats, CycleStats::default());
        assert!(
            queue
                .dequeue(Duration::from_millis(5))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn other_errors_propagate() {
        let mut api = MockGithubApi::new();
        api.expect_list_public_events().returning(|| {
            Err(ApiError::ServerError {
                status: Some(500),
                body: "boom".into(),
            })
        });
        let queue = Arc::new(MemoryQueue::new());
        let ingestor = Ingestor::new(Arc::new(api), queue);

        assert!(ingestor.run_cycle().await.is_err());
    }
}
