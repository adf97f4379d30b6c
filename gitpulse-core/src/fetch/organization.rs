use super::log_api_error;
use crate::error::Result;
use crate::github::GithubApi;
use crate::guard::FetchGuard;
use crate::models::OrganizationRecord;
use crate::store::OrgStore;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub struct OrgFetcher {
    api: Arc<dyn GithubApi>,
    orgs: Arc<dyn OrgStore>,
    guard: FetchGuard,
}

impl fmt::Debug for OrgFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrgFetcher")
            .field("guard", &self.guard)
            .finish()
    }
}

impl OrgFetcher {
    pub fn new(api: Arc<dyn GithubApi>, orgs: Arc<dyn OrgStore>, guard: FetchGuard) -> Self {
        Self { api, orgs, guard }
    }

    pub async fn fetch(&self, login: &str) -> Result<OrganizationRecord> {
        let existing = self.orgs.find_by_login(login).await?;
        if let Some(existing) = &existing
            && !self.guard.should_fetch(Some(existing.updated_at))
        {
            debug!(
                login,
                updated_at = %existing.updated_at,
                "organization record fresh, skipping upstream fetch"
            );
            return Ok(existing.clone());
        }

        let data = self.api.get_organization(login).await.inspect_err(|e| {
            log_api_error("organization", login, e);
        })?;

        Ok(self.orgs.save(&data).await?)
    }
}
