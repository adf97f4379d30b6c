use super::log_api_error;
use crate::error::Result;
use crate::github::GithubApi;
use crate::guard::FetchGuard;
use crate::jobs::{Job, JobEnvelope, JobQueue};
use crate::models::UserRecord;
use crate::store::UserStore;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub struct UserFetcher {
    api: Arc<dyn GithubApi>,
    users: Arc<dyn UserStore>,
    queue: Arc<dyn JobQueue>,
    guard: FetchGuard,
}

impl fmt::Debug for UserFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserFetcher")
            .field("guard", &self.guard)
            .finish()
    }
}

impl UserFetcher {
    pub fn new(
        api: Arc<dyn GithubApi>,
        users: Arc<dyn UserStore>,
        queue: Arc<dyn JobQueue>,
        guard: FetchGuard,
    ) -> Self {
        Self {
            api,
            users,
            queue,
            guard,
        }
    }

    /// Refresh the user record unless the local copy is still fresh. A
    /// successful refresh with a non-empty avatar URL also schedules avatar
    /// processing.
    pub async fn fetch(&self, login: &str) -> Result<UserRecord> {
        let existing = self.users.find_by_login(login).await?;
        if let Some(existing) = &existing
            && !self.guard.should_fetch(Some(existing.updated_at))
        {
            debug!(
                login,
                updated_at = %existing.updated_at,
                "user record fresh, skipping upstream fetch"
            );
            return Ok(existing.clone());
        }

        let data = self.api.get_user(login).await.inspect_err(|e| {
            log_api_error("user", login, e);
        })?;

        let record = self.users.save(&data).await?;

        if let Some(avatar_url) = data.avatar_url.as_deref().filter(|u| !u.is_empty()) {
            self.queue
                .enqueue(JobEnvelope::new(Job::ProcessAvatar {
                    user_id: data.id,
                    url: avatar_url.to_string(),
                }))
                .await?;
        }

        Ok(record)
    }
}
