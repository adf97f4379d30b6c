//! # GitPulse Worker
//!
//! The `gitpulse` binary wires the core library against its real backends
//! (Postgres, Redis, S3, the public GitHub API) and runs one of two process
//! roles: the polling ingestion worker or the background job runner.
//!
//! Exit codes: 0 on clean shutdown (signal received, loop drained),
//! non-zero on fatal configuration or connection errors at startup.

mod config;

use clap::{Parser, Subcommand};
use config::Config;
use gitpulse_core::avatar::AvatarPipeline;
use gitpulse_core::blobstore::{S3BlobStore, S3Config};
use gitpulse_core::download::DownloadClient;
use gitpulse_core::fetch::{OrgFetcher, RepoFetcher, UserFetcher};
use gitpulse_core::github::GithubClient;
use gitpulse_core::guard::FetchGuard;
use gitpulse_core::handler::EventHandler;
use gitpulse_core::ingest::Ingestor;
use gitpulse_core::jobs::{JobContext, JobRunner, RedisQueue};
use gitpulse_core::kv::RedisKv;
use gitpulse_core::ratelimit::RateCoordinator;
use gitpulse_core::store::{
    PostgresEventStore, PostgresOrgStore, PostgresRepoStore, PostgresUserStore, run_migrations,
};
use gitpulse_core::worker::{IngestWorker, watch_shutdown_signals};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gitpulse", about = "GitHub push-event ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling ingestion worker
    Ingest,
    /// Run the background job runner
    Work,
    /// Run a single ingest cycle and exit
    Once,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Migrate => {
            let pool = connect_pool(&config).await?;
            run_migrations(&pool).await?;
            info!("migrations applied");
        }
        Command::Once => {
            let app = App::build(&config).await?;
            let stats = app.ingestor.run_cycle().await?;
            info!(
                events_fetched = stats.events_fetched,
                jobs_enqueued = stats.jobs_enqueued,
                "single cycle complete"
            );
        }
        Command::Ingest => {
            let app = App::build(&config).await?;
            let worker = IngestWorker::new(app.ingestor, None);
            worker.start().await;
        }
        Command::Work => {
            let app = App::build(&config).await?;
            let runner = JobRunner::new(app.queue, Arc::new(app.context), config.job_concurrency);
            watch_shutdown_signals(runner.shutdown_flag());
            runner.run().await;
        }
    }

    Ok(())
}

/// Everything both process roles can need, wired once.
struct App {
    ingestor: Ingestor,
    context: JobContext,
    queue: Arc<RedisQueue>,
}

impl App {
    async fn build(config: &Config) -> anyhow::Result<Self> {
        let pool = connect_pool(config).await?;

        let kv = Arc::new(RedisKv::connect(&config.redis_url).await?);
        let limiter = Arc::new(RateCoordinator::new(kv));
        let api = Arc::new(GithubClient::new(
            config.github_api_url.clone(),
            config.github_token.clone(),
            limiter,
        ));

        let queue = Arc::new(RedisQueue::connect(&config.redis_url).await?);

        let events = Arc::new(PostgresEventStore::new(pool.clone()));
        let users = Arc::new(PostgresUserStore::new(pool.clone()));
        let repos = Arc::new(PostgresRepoStore::new(pool.clone()));
        let orgs = Arc::new(PostgresOrgStore::new(pool.clone()));

        let guard = FetchGuard::from_env();

        let blobs = Arc::new(
            S3BlobStore::connect(S3Config {
                bucket: config.avatar_bucket.clone(),
                region: config.aws_region.clone(),
                endpoint_url: config.aws_endpoint_url.clone(),
                force_path_style: config.aws_force_path_style,
            })
            .await,
        );
        let downloader = Arc::new(DownloadClient::new());

        let context = JobContext {
            handler: EventHandler::new(events, queue.clone()),
            users: UserFetcher::new(api.clone(), users.clone(), queue.clone(), guard),
            repos: RepoFetcher::new(api.clone(), repos, guard),
            orgs: OrgFetcher::new(api.clone(), orgs, guard),
            avatars: AvatarPipeline::new(downloader, blobs, users),
        };

        let ingestor = Ingestor::new(api, queue.clone());

        Ok(Self {
            ingestor,
            context,
            queue,
        })
    }
}

async fn connect_pool(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    info!("Successfully connected to PostgreSQL");
    Ok(pool)
}
