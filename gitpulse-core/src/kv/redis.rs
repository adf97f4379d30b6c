use super::{KeyValue, KvError};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

// Saturating decrement, executed server-side so the floor holds across
// concurrent callers.
const DECR_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local next = current - tonumber(ARGV[1])
if next < 0 then next = 0 end
redis.call('SET', KEYS[1], next)
return next
"#;

/// Redis-backed adapter over a multiplexed [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKv")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        info!("Connecting to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| KvError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Backend(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self { conn })
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KeyValue for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        debug!("KV GET: {}", key);

        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| KvError::Backend(format!("Redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        debug!("KV SET: {} (TTL: {:?})", key, ttl);

        let mut conn = self.conn.clone();
        if let Some(ttl) = ttl {
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| KvError::Backend(format!("Redis SETEX failed: {e}")))?;
        } else {
            conn.set::<_, _, ()>(key, value)
                .await
                .map_err(|e| KvError::Backend(format!("Redis SET failed: {e}")))?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        debug!("KV DELETE: {}", key);

        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| KvError::Backend(format!("Redis DEL failed: {e}")))?;

        Ok(())
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        conn.incr(key, by)
            .await
            .map_err(|e| KvError::Backend(format!("Redis INCRBY failed: {e}")))
    }

    async fn decr(&self, key: &str, by: i64) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        let next: i64 = redis::Script::new(DECR_SCRIPT)
            .key(key)
            .arg(by)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(format!("Redis DECR script failed: {e}")))?;

        Ok(next)
    }
}
