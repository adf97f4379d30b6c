//! Enrichment fetchers: guard, then API, then saver.
//!
//! Each fetcher looks up the local record, asks the fetch guard whether it is
//! stale, and only then goes upstream. The guard race (two workers both
//! deciding to fetch) is accepted; the savers make the outcome converge.

mod organization;
mod repository;
mod user;

pub use organization::OrgFetcher;
pub use repository::RepoFetcher;
pub use user::UserFetcher;

use crate::github::ApiError;
use tracing::warn;

fn log_api_error(entity: &str, key: &str, error: &ApiError) {
    match error {
        ApiError::RateLimited { status, .. } => {
            warn!(entity, key, status = ?status, "rate limited while fetching");
        }
        ApiError::ServerError { status, .. } => {
            warn!(entity, key, status = ?status, "server error while fetching");
        }
        ApiError::ClientError { status, .. } => {
            warn!(entity, key, status, "client error while fetching");
        }
        ApiError::NotModified => {
            warn!(entity, key, "unexpected 304 while fetching");
        }
    }
}
