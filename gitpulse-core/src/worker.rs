//! The long-running ingestion loop.
//!
//! A single cooperative loop: run one cycle, back off on failure, sleep the
//! poll interval, repeat. Shutdown signals flip an atomic flag and nothing
//! else; the loop notices within one sleep unit because every sleep is taken
//! in one-second slices.

use crate::error::IngestError;
use crate::github::ApiError;
use crate::ingest::Ingestor;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const POLL_INTERVAL_ENV: &str = "INGESTION_POLL_INTERVAL";

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(300);
const ERROR_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_SLEEP_UNIT: Duration = Duration::from_secs(1);

/// Poll interval from `INGESTION_POLL_INTERVAL` (seconds); unset or invalid
/// values fall back to the one-minute default, invalid ones with a warning.
pub fn poll_interval_from_env() -> Duration {
    match std::env::var(POLL_INTERVAL_ENV) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(seconds) => Duration::from_secs(seconds),
            Err(_) => {
                warn!(
                    "invalid {} value {:?}, using default of {}s",
                    POLL_INTERVAL_ENV,
                    raw,
                    DEFAULT_POLL_INTERVAL.as_secs()
                );
                DEFAULT_POLL_INTERVAL
            }
        },
        Err(_) => DEFAULT_POLL_INTERVAL,
    }
}

/// Spawn watcher tasks that flip `running` to false on TERM, INT, or QUIT.
/// The watchers do no I/O; acting on the flag is the loop's job.
pub fn watch_shutdown_signals(running: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        for kind in [
            SignalKind::terminate(),
            SignalKind::interrupt(),
            SignalKind::quit(),
        ] {
            match signal(kind) {
                Ok(mut stream) => {
                    let running = Arc::clone(&running);
                    tokio::spawn(async move {
                        stream.recv().await;
                        running.store(false, Ordering::SeqCst);
                    });
                }
                Err(e) => warn!("failed to install signal handler: {e}"),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            running.store(false, Ordering::SeqCst);
        });
    }
}

pub struct IngestWorker {
    ingestor: Ingestor,
    poll_interval: Duration,
    sleep_unit: Duration,
    running: Arc<AtomicBool>,
}

impl fmt::Debug for IngestWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestWorker")
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl IngestWorker {
    /// Poll interval precedence: explicit argument, then environment, then
    /// the one-minute default.
    pub fn new(ingestor: Ingestor, poll_interval: Option<Duration>) -> Self {
        Self {
            ingestor,
            poll_interval: poll_interval.unwrap_or_else(poll_interval_from_env),
            sleep_unit: DEFAULT_SLEEP_UNIT,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shrink the sleep slice; tests use this to keep shutdown latency low.
    pub fn with_sleep_unit(mut self, unit: Duration) -> Self {
        self.sleep_unit = unit.max(Duration::from_millis(1));
        self
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until a shutdown signal arrives. Returns within one sleep unit of
    /// the flag dropping.
    pub async fn start(&self) {
        watch_shutdown_signals(Arc::clone(&self.running));
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "ingestion worker started"
        );

        while self.running.load(Ordering::SeqCst) {
            match self.ingestor.run_cycle().await {
                Ok(_) => {}
                Err(IngestError::Api(ApiError::RateLimited { status, .. })) => {
                    warn!(
                        status = ?status,
                        backoff_secs = RATE_LIMIT_BACKOFF.as_secs(),
                        "cycle rate limited, backing off"
                    );
                    self.interruptible_sleep(RATE_LIMIT_BACKOFF).await;
                }
                Err(IngestError::Api(ApiError::ServerError { status, .. })) => {
                    error!(
                        status = ?status,
                        backoff_secs = ERROR_BACKOFF.as_secs(),
                        "cycle hit upstream server error, backing off"
                    );
                    self.interruptible_sleep(ERROR_BACKOFF).await;
                }
                Err(e) => {
                    error!(error = %e, backoff_secs = ERROR_BACKOFF.as_secs(), "cycle failed");
                    self.interruptible_sleep(ERROR_BACKOFF).await;
                }
            }

            if self.running.load(Ordering::SeqCst) {
                self.interruptible_sleep(self.poll_interval).await;
            }
        }

        info!("ingestion worker stopped");
    }

    /// Sleep in `sleep_unit` slices, returning early once the flag drops.
    async fn interruptible_sleep(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && self.running.load(Ordering::SeqCst) {
            let step = remaining.min(self.sleep_unit);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }
}
