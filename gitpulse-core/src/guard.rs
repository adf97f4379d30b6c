//! Staleness guard for outbound fetches.
//!
//! Purely advisory: two workers can race the check and both fetch, and that
//! is fine because the savers are idempotent. The guard exists to cut call
//! volume, not to provide mutual exclusion.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(5 * 60);
pub const STALENESS_THRESHOLD_ENV: &str = "STALENESS_THRESHOLD_MINUTES";

#[derive(Debug, Clone, Copy)]
pub struct FetchGuard {
    threshold: Duration,
}

impl Default for FetchGuard {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS_THRESHOLD)
    }
}

impl FetchGuard {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Threshold from `STALENESS_THRESHOLD_MINUTES`; zero disables caching.
    /// Unset or unparseable values fall back to the five-minute default.
    pub fn from_env() -> Self {
        match std::env::var(STALENESS_THRESHOLD_ENV) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(minutes) => Self::new(Duration::from_secs(minutes * 60)),
                Err(_) => {
                    warn!(
                        "invalid {} value {:?}, using default of {} minutes",
                        STALENESS_THRESHOLD_ENV,
                        raw,
                        DEFAULT_STALENESS_THRESHOLD.as_secs() / 60
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether a record with the given local `updated_at` needs refreshing.
    /// Absent records always do; a zero threshold disables caching entirely.
    pub fn should_fetch(&self, updated_at: Option<DateTime<Utc>>) -> bool {
        if self.threshold.is_zero() {
            return true;
        }
        let Some(updated_at) = updated_at else {
            return true;
        };
        let age = Utc::now().signed_duration_since(updated_at);
        age > chrono::Duration::seconds(self.threshold.as_secs() as i64)
    }
}
