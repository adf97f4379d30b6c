use super::queue::{JobQueue, QueueError};
use super::JobEnvelope;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const READY_KEY: &str = "gitpulse:jobs:ready";
const DELAYED_KEY: &str = "gitpulse:jobs:delayed";

// How many due members to promote from the delayed set per dequeue call.
const PROMOTE_BATCH: usize = 32;

/// Redis-backed queue: a list for ready work, a sorted set (scored by due
/// time) for delayed re-enqueues. Promotion races between runner processes
/// are settled by ZREM - whichever process removes the member pushes it.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        info!("Connecting to Redis job queue at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Backend(format!("Failed to create Redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Backend(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self { conn })
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Move due members of the delayed set onto the ready list.
    async fn promote_due(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(DELAYED_KEY)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("Redis ZRANGEBYSCORE failed: {e}")))?;

        for member in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(DELAYED_KEY)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::Backend(format!("Redis ZREM failed: {e}")))?;

            // Zero means another runner already promoted this member.
            if removed == 1 {
                redis::cmd("LPUSH")
                    .arg(READY_KEY)
                    .arg(&member)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| QueueError::Backend(format!("Redis LPUSH failed: {e}")))?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError> {
        debug!(job = envelope.job.name(), id = %envelope.id, "enqueue");

        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(READY_KEY)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("Redis LPUSH failed: {e}")))?;

        Ok(())
    }

    async fn enqueue_in(&self, delay: Duration, envelope: JobEnvelope) -> Result<(), QueueError> {
        debug!(
            job = envelope.job.name(),
            id = %envelope.id,
            delay_secs = delay.as_secs(),
            "delayed enqueue"
        );

        let payload = serde_json::to_string(&envelope)?;
        let due_at = Utc::now().timestamp() + delay.as_secs() as i64;
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(DELAYED_KEY)
            .arg(due_at)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("Redis ZADD failed: {e}")))?;

        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<JobEnvelope>, QueueError> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = if wait.is_zero() {
            redis::cmd("RPOP")
                .arg(READY_KEY)
                .query_async::<Option<String>>(&mut conn)
                .await
                .map_err(|e| QueueError::Backend(format!("Redis RPOP failed: {e}")))?
                .map(|payload| (READY_KEY.to_string(), payload))
        } else {
            redis::cmd("BRPOP")
                .arg(READY_KEY)
                .arg(wait.as_secs_f64())
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::Backend(format!("Redis BRPOP failed: {e}")))?
        };

        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
