use super::log_api_error;
use crate::error::Result;
use crate::github::GithubApi;
use crate::guard::FetchGuard;
use crate::models::RepositoryRecord;
use crate::store::RepoStore;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub struct RepoFetcher {
    api: Arc<dyn GithubApi>,
    repos: Arc<dyn RepoStore>,
    guard: FetchGuard,
}

impl fmt::Debug for RepoFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoFetcher")
            .field("guard", &self.guard)
            .finish()
    }
}

impl RepoFetcher {
    pub fn new(api: Arc<dyn GithubApi>, repos: Arc<dyn RepoStore>, guard: FetchGuard) -> Self {
        Self { api, repos, guard }
    }

    pub async fn fetch(&self, owner: &str, name: &str) -> Result<RepositoryRecord> {
        let full_name = format!("{owner}/{name}");

        let existing = self.repos.find_by_full_name(&full_name).await?;
        if let Some(existing) = &existing
            && !self.guard.should_fetch(Some(existing.updated_at))
        {
            debug!(
                full_name,
                updated_at = %existing.updated_at,
                "repository record fresh, skipping upstream fetch"
            );
            return Ok(existing.clone());
        }

        let data = self.api.get_repository(owner, name).await.inspect_err(|e| {
            log_api_error("repository", &full_name, e);
        })?;

        Ok(self.repos.save(&data).await?)
    }
}
