//! Cross-process rate-limit coordination.
//!
//! One record per upstream resource class lives in the shared KV store under
//! `rate_limit:{resource}`. Before every outbound call the coordinator checks
//! the record and sleeps through an exhausted window; after every response it
//! re-records the window from the rate-limit headers. Writers race and the
//! last one wins, which is sound because the upstream headers are strictly
//! monotonic within a reset window.

use crate::kv::{KeyValue, KvError};
use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_RESOURCE: &str = "core";

/// Grace added on top of the advertised reset instant before retrying.
pub const RESET_BUFFER: Duration = Duration::from_secs(5);

const MIN_SLEEP: Duration = Duration::from_secs(1);
const MIN_TTL: Duration = Duration::from_secs(60);

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";
const RESOURCE_HEADER: &str = "x-ratelimit-resource";

/// The stored window: request budget, what is left of it, and the Unix epoch
/// second at which it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub limit: i64,
    pub remaining: i64,
    pub reset: i64,
}

pub fn rate_limit_key(resource: &str) -> String {
    format!("rate_limit:{resource}")
}

pub struct RateCoordinator {
    kv: Arc<dyn KeyValue>,
    buffer: Duration,
}

impl fmt::Debug for RateCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateCoordinator")
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl RateCoordinator {
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self {
            kv,
            buffer: RESET_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Block until the stored window for `resource` permits a request.
    ///
    /// Returns immediately when no record exists or budget remains. When the
    /// record shows an exhausted window that has not reset yet, sleeps until
    /// `reset + buffer` (at least one second) and then drops the record so
    /// the next caller proceeds without re-checking a stale window.
    pub async fn check_limit(&self, resource: &str) -> Result<(), KvError> {
        let key = rate_limit_key(resource);
        debug!("rate check: {}", key);

        let Some(bytes) = self.kv.get(&key).await? else {
            return Ok(());
        };

        let snapshot: RateLimitSnapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("dropping unreadable rate-limit record {}: {}", key, e);
                self.kv.delete(&key).await?;
                return Ok(());
            }
        };

        let now = Utc::now().timestamp();
        if snapshot.remaining <= 0 && snapshot.reset > now {
            let wait = Duration::from_secs((snapshot.reset - now) as u64)
                .saturating_add(self.buffer)
                .max(MIN_SLEEP);
            warn!(
                resource,
                reset = snapshot.reset,
                wait_secs = wait.as_secs(),
                "rate limit exhausted, sleeping until window resets"
            );
            tokio::time::sleep(wait).await;
            self.kv.delete(&key).await?;
            info!(resource, "rate limit window elapsed, resuming");
        } else if snapshot.limit > 0 && snapshot.remaining * 10 < snapshot.limit {
            warn!(
                resource,
                remaining = snapshot.remaining,
                limit = snapshot.limit,
                "rate limit running low"
            );
        }

        Ok(())
    }

    /// Record the window advertised by a response.
    ///
    /// Ignores responses that do not carry the full header triple. The record
    /// TTL outlives the window by twice the buffer (and never less than a
    /// minute) so a crashed writer cannot pin a stale record forever.
    pub async fn record_limit(&self, headers: &HeaderMap) -> Result<(), KvError> {
        let resource =
            header_str(headers, RESOURCE_HEADER).unwrap_or_else(|| DEFAULT_RESOURCE.to_string());

        let (Some(limit), Some(remaining), Some(reset)) = (
            header_i64(headers, LIMIT_HEADER),
            header_i64(headers, REMAINING_HEADER),
            header_i64(headers, RESET_HEADER),
        ) else {
            debug!("response carried no complete rate-limit headers");
            return Ok(());
        };

        let snapshot = RateLimitSnapshot {
            limit,
            remaining,
            reset,
        };

        let now = Utc::now().timestamp();
        let ttl = Duration::from_secs((reset - now).max(0) as u64)
            .saturating_add(self.buffer * 2)
            .max(MIN_TTL);

        let key = rate_limit_key(&resource);
        debug!(
            resource,
            remaining,
            limit,
            ttl_secs = ttl.as_secs(),
            "recording rate limit window"
        );
        self.kv
            .set(&key, &serde_json::to_vec(&snapshot)?, Some(ttl))
            .await
    }
}

/// First value of a (possibly repeated) header, parsed as an integer.
/// Header-name matching is case-insensitive by construction of `HeaderMap`.
pub(crate) fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get_all(name)
        .iter()
        .next()
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(name)
        .iter()
        .next()
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.append(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn coordinator() -> (Arc<MemoryKv>, RateCoordinator) {
        let kv = Arc::new(MemoryKv::new());
        let coordinator = RateCoordinator::new(kv.clone() as Arc<dyn KeyValue>);
        (kv, coordinator)
    }

    #[tokio::test]
    async fn record_limit_stores_snapshot() {
        let (kv, coordinator) = coordinator();
        let reset = Utc::now().timestamp() + 120;
        coordinator
            .record_limit(&headers(&[
                ("X-RateLimit-Limit", "5000"),
                ("X-RateLimit-Remaining", "4990"),
                ("X-RateLimit-Reset", &reset.to_string()),
            ]))
            .await
            .unwrap();

        let stored = kv.get(&rate_limit_key("core")).await.unwrap().unwrap();
        let snapshot: RateLimitSnapshot = serde_json::from_slice(&stored).unwrap();
        assert_eq!(
            snapshot,
            RateLimitSnapshot {
                limit: 5000,
                remaining: 4990,
                reset,
            }
        );
    }

    #[tokio::test]
    async fn record_limit_honors_resource_header() {
        let (kv, coordinator) = coordinator();
        let reset = Utc::now().timestamp() + 60;
        coordinator
            .record_limit(&headers(&[
                ("x-ratelimit-limit", "60"),
                ("x-ratelimit-remaining", "10"),
                ("x-ratelimit-reset", &reset.to_string()),
                ("x-ratelimit-resource", "search"),
            ]))
            .await
            .unwrap();

        assert!(kv.get(&rate_limit_key("search")).await.unwrap().is_some());
        assert!(kv.get(&rate_limit_key("core")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_limit_skips_incomplete_headers() {
        let (kv, coordinator) = coordinator();
        coordinator
            .record_limit(&headers(&[("x-ratelimit-limit", "5000")]))
            .await
            .unwrap();

        assert!(kv.get(&rate_limit_key("core")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn check_limit_passes_when_no_record() {
        let (_kv, coordinator) = coordinator();
        coordinator.check_limit("core").await.unwrap();
    }

    #[tokio::test]
    async fn check_limit_passes_with_remaining_budget() {
        let (kv, coordinator) = coordinator();
        let snapshot = RateLimitSnapshot {
            limit: 5000,
            remaining: 100,
            reset: Utc::now().timestamp() + 600,
        };
        kv.set(
            &rate_limit_key("core"),
            &serde_json::to_vec(&snapshot).unwrap(),
            None,
        )
        .await
        .unwrap();

        coordinator.check_limit("core").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn check_limit_sleeps_through_exhausted_window() {
        let (kv, coordinator) = coordinator();
        let snapshot = RateLimitSnapshot {
            limit: 5000,
            remaining: 0,
            reset: Utc::now().timestamp() + 2,
        };
        kv.set(
            &rate_limit_key("core"),
            &serde_json::to_vec(&snapshot).unwrap(),
            None,
        )
        .await
        .unwrap();

        let started = tokio::time::Instant::now();
        coordinator.check_limit("core").await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        // Record is dropped after the sleep so the next caller proceeds.
        assert!(kv.get(&rate_limit_key("core")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn check_limit_drops_unreadable_record() {
        let (kv, coordinator) = coordinator();
        kv.set(&rate_limit_key("core"), b"not json", None)
            .await
            .unwrap();

        coordinator.check_limit("core").await.unwrap();
        assert!(kv.get(&rate_limit_key("core")).await.unwrap().is_none());
    }

    #[test]
    fn header_extraction_takes_first_of_repeated_values() {
        let map = headers(&[("x-ratelimit-limit", "60"), ("x-ratelimit-limit", "120")]);
        assert_eq!(header_i64(&map, "x-ratelimit-limit"), Some(60));
    }

    #[test]
    fn header_extraction_is_case_insensitive() {
        let map = headers(&[("X-RateLimit-Remaining", "0")]);
        assert_eq!(header_i64(&map, "x-ratelimit-remaining"), Some(0));
    }
}
