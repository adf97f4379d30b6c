//! Job execution: a small pool of workers draining the queue.
//!
//! Each envelope runs to completion on one task. Failures are classified per
//! job class ([`super::classify`]); retries go back through the queue with a
//! delay, and every terminal outcome (discard or exhausted retries) is
//! logged with the job identity and cause. Shutdown is cooperative: workers
//! notice the flag between pops and in-flight jobs drain.

use super::queue::{JobQueue, QueueError};
use super::{Disposition, Job, JobEnvelope, JobError, classify};
use crate::avatar::AvatarPipeline;
use crate::fetch::{OrgFetcher, RepoFetcher, UserFetcher};
use crate::handler::EventHandler;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 4;

const DEQUEUE_WAIT: Duration = Duration::from_secs(1);

/// Everything a job can touch, wired once at startup.
pub struct JobContext {
    pub handler: EventHandler,
    pub users: UserFetcher,
    pub repos: RepoFetcher,
    pub orgs: OrgFetcher,
    pub avatars: AvatarPipeline,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext").finish()
    }
}

impl JobContext {
    pub async fn execute(&self, job: &Job) -> Result<(), JobError> {
        match job {
            Job::HandleEvent { raw } => {
                self.handler.handle(raw).await?;
            }
            Job::FetchUser { login } => {
                self.users.fetch(login).await?;
            }
            Job::FetchRepo { owner, name } => {
                self.repos.fetch(owner, name).await?;
            }
            Job::FetchOrg { login } => {
                self.orgs.fetch(login).await?;
            }
            Job::ProcessAvatar { user_id, url } => {
                self.avatars.process(*user_id, url).await?;
            }
        }
        Ok(())
    }
}

pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    context: Arc<JobContext>,
    concurrency: usize,
    running: Arc<AtomicBool>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("concurrency", &self.concurrency)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl JobRunner {
    pub fn new(queue: Arc<dyn JobQueue>, context: Arc<JobContext>, concurrency: usize) -> Self {
        Self {
            queue,
            context,
            concurrency: concurrency.max(1),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag that stops the pool; shared so signal watchers can flip it.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the shutdown flag drops. Blocks the caller for the lifetime
    /// of the pool.
    pub async fn run(&self) {
        info!(concurrency = self.concurrency, "job runner starting");

        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency {
            let queue = Arc::clone(&self.queue);
            let context = Arc::clone(&self.context);
            let running = Arc::clone(&self.running);
            workers.spawn(async move {
                worker_loop(worker, queue, context, running).await;
            });
        }

        while workers.join_next().await.is_some() {}
        info!("job runner stopped");
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<dyn JobQueue>,
    context: Arc<JobContext>,
    running: Arc<AtomicBool>,
) {
    debug!(worker, "job worker started");
    while running.load(Ordering::SeqCst) {
        let envelope = match queue.dequeue(DEQUEUE_WAIT).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(QueueError::Closed) => break,
            Err(e) => {
                error!(worker, "dequeue failed: {e}");
                tokio::time::sleep(DEQUEUE_WAIT).await;
                continue;
            }
        };
        process_envelope(queue.as_ref(), &context, envelope).await;
    }
    debug!(worker, "job worker stopped");
}

async fn process_envelope(queue: &dyn JobQueue, context: &JobContext, envelope: JobEnvelope) {
    debug!(
        job = envelope.job.name(),
        id = %envelope.id,
        attempt = envelope.attempt,
        "executing job"
    );

    let Err(err) = context.execute(&envelope.job).await else {
        return;
    };

    match classify(&envelope.job, &err, envelope.attempt) {
        Disposition::Retry { delay } => {
            warn!(
                job = envelope.job.name(),
                id = %envelope.id,
                attempt = envelope.attempt,
                delay_secs = delay.as_secs(),
                error = %err,
                "job failed, scheduling retry"
            );
            let next = envelope.next_attempt();
            if let Err(e) = queue.enqueue_in(delay, next).await {
                error!("failed to re-enqueue job: {e}");
            }
        }
        Disposition::Exhausted => {
            error!(
                job = envelope.job.name(),
                id = %envelope.id,
                attempt = envelope.attempt,
                args = ?envelope.job,
                status = ?err.status(),
                error = %err,
                "job retries exhausted, dropping"
            );
        }
        Disposition::Discard => {
            if err.is_expected() {
                warn!(
                    job = envelope.job.name(),
                    id = %envelope.id,
                    args = ?envelope.job,
                    status = ?err.status(),
                    error = %err,
                    "discarding job"
                );
            } else {
                error!(
                    job = envelope.job.name(),
                    id = %envelope.id,
                    args = ?envelope.job,
                    status = ?err.status(),
                    error = %err,
                    "discarding job"
                );
            }
        }
    }
}
