//! Key/value storage abstraction.
//!
//! The shared store holds only ephemeral coordination state (rate-limit
//! records); it is safely rebuildable and never authoritative. Two adapters:
//! [`MemoryKv`] for tests and single-process runs, [`RedisKv`] for
//! cross-process coordination.

mod memory;
mod redis;

pub use memory::MemoryKv;
pub use redis::RedisKv;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),

    #[error("kv serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Byte-oriented key/value store with TTL support and atomic counters.
///
/// `decr` saturates at zero and must be atomic across processes; the Redis
/// adapter runs it as a server-side script.
#[async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    async fn incr(&self, key: &str, by: i64) -> Result<i64, KvError>;

    async fn decr(&self, key: &str, by: i64) -> Result<i64, KvError>;
}
