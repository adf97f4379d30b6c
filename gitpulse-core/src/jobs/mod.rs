//! Background job types and the per-class retry policy.
//!
//! Jobs travel the queue as JSON envelopes carrying a synthetic id and the
//! attempt counter. Delivery is at-least-once and the queue performs no
//! deduplication; duplicate work is absorbed by the idempotent savers.

mod queue;
mod redis_queue;
pub mod runtime;

pub use queue::{JobQueue, MemoryQueue, QueueError};
pub use redis_queue::RedisQueue;
pub use runtime::{JobContext, JobRunner};

use crate::avatar::AvatarError;
use crate::error::IngestError;
use crate::github::ApiError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Persist one raw event and derive its enrichment jobs.
    HandleEvent { raw: String },
    FetchUser { login: String },
    FetchRepo { owner: String, name: String },
    FetchOrg { login: String },
    ProcessAvatar { user_id: i64, url: String },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::HandleEvent { .. } => "handle_event",
            Job::FetchUser { .. } => "fetch_user",
            Job::FetchRepo { .. } => "fetch_repo",
            Job::FetchOrg { .. } => "fetch_org",
            Job::ProcessAvatar { .. } => "process_avatar",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub attempt: u32,
    pub job: Job,
}

impl JobEnvelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 1,
            job,
        }
    }

    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// Anything a job execution can fail with.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Avatar(#[from] AvatarError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<IngestError> for JobError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Api(e) => JobError::Api(e),
            IngestError::Store(e) => JobError::Store(e),
            IngestError::Queue(e) => JobError::Queue(e),
            IngestError::Decode(e) => JobError::Decode(e),
        }
    }
}

impl JobError {
    pub fn status(&self) -> Option<u16> {
        match self {
            JobError::Api(e) => e.status(),
            _ => None,
        }
    }

    /// Failures that are an expected part of operating against arbitrary
    /// public data; discarding them is logged at warn rather than error.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            JobError::Api(ApiError::ClientError { .. })
                | JobError::Avatar(AvatarError::InvalidUrl(_))
                | JobError::Avatar(AvatarError::FileTooLarge { .. })
                | JobError::Avatar(AvatarError::RecordNotFound(_))
        )
    }
}

/// What the runner should do with a failed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry { delay: Duration },
    /// The retry budget for this error class is spent.
    Exhausted,
    /// Not worth retrying at all.
    Discard,
}

const DB_RETRY_DELAY: Duration = Duration::from_secs(5);
const DB_RETRY_ATTEMPTS: u32 = 3;
const RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);
const RATE_LIMIT_RETRY_ATTEMPTS: u32 = 3;
const TRANSIENT_RETRY_ATTEMPTS: u32 = 5;

/// Decide the fate of a failed job per the retry table:
///
/// | job            | error                         | action               |
/// |----------------|-------------------------------|----------------------|
/// | handle_event   | deadlock / connection lost    | 5s fixed, 3 attempts |
/// | fetch_*        | server error                  | attempt^4+2s, 5      |
/// | fetch_*        | rate limited                  | 1h fixed, 3          |
/// | fetch_*        | client error                  | discard              |
/// | process_avatar | download / object store error | attempt^4+2s, 5      |
/// | process_avatar | invalid url / too large       | discard              |
pub fn classify(job: &Job, error: &JobError, attempt: u32) -> Disposition {
    match job {
        Job::HandleEvent { .. } => match error {
            JobError::Store(e) if e.is_deadlock() || e.is_connection() => {
                retry_fixed(DB_RETRY_DELAY, DB_RETRY_ATTEMPTS, attempt)
            }
            _ => Disposition::Discard,
        },
        Job::FetchUser { .. } | Job::FetchRepo { .. } | Job::FetchOrg { .. } => match error {
            JobError::Api(ApiError::ServerError { .. }) => retry_backoff(attempt),
            JobError::Api(ApiError::RateLimited { .. }) => {
                retry_fixed(RATE_LIMIT_RETRY_DELAY, RATE_LIMIT_RETRY_ATTEMPTS, attempt)
            }
            _ => Disposition::Discard,
        },
        Job::ProcessAvatar { .. } => match error {
            JobError::Avatar(AvatarError::Download(_)) | JobError::Avatar(AvatarError::Storage(_)) => {
                retry_backoff(attempt)
            }
            _ => Disposition::Discard,
        },
    }
}

fn retry_fixed(delay: Duration, max_attempts: u32, attempt: u32) -> Disposition {
    if attempt >= max_attempts {
        Disposition::Exhausted
    } else {
        Disposition::Retry { delay }
    }
}

/// Polynomial backoff: `attempt^4 + 2` seconds, capped at five attempts.
fn retry_backoff(attempt: u32) -> Disposition {
    if attempt >= TRANSIENT_RETRY_ATTEMPTS {
        Disposition::Exhausted
    } else {
        Disposition::Retry {
            delay: Duration::from_secs(u64::from(attempt).pow(4) + 2),
        }
    }
}
