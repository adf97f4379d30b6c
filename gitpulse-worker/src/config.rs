use anyhow::Context;
use std::env;
use tracing::warn;

/// Process-level configuration, read once at startup. Missing required
/// variables abort with a fatal error; optional ones fall back to their
/// defaults, warning when a value is present but unusable.
///
/// The poll interval and staleness threshold are read by the core library
/// itself (`INGESTION_POLL_INTERVAL`, `STALENESS_THRESHOLD_MINUTES`).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub github_api_url: String,
    pub github_token: Option<String>,
    pub job_concurrency: usize,
    pub avatar_bucket: String,
    pub aws_region: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_force_path_style: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL").context("REDIS_URL must be set")?,

            github_api_url: env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| gitpulse_core::github::DEFAULT_BASE_URL.to_string()),
            github_token: env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),

            job_concurrency: parse_or_default(
                "JOB_CONCURRENCY",
                gitpulse_core::jobs::runtime::DEFAULT_CONCURRENCY,
            ),

            avatar_bucket: env::var("AVATAR_S3_BUCKET")
                .unwrap_or_else(|_| "user-avatars".to_string()),
            aws_region: env::var("AWS_REGION").ok(),
            aws_endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
            aws_force_path_style: env::var("AWS_FORCE_PATH_STYLE")
                .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }
}

fn parse_or_default(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("invalid {} value {:?}, using default of {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
