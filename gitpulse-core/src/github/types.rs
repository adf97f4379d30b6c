//! Decoded shapes of the upstream REST payloads.
//!
//! Every field the persistence layer maps is declared here explicitly;
//! anything the API may omit is an `Option` so that mapping stays total.
//! Unknown fields are ignored by serde, which keeps the types stable when
//! the upstream adds attributes.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One entry of the public events listing, trimmed to the attributes the
/// pipeline reads. The verbatim JSON travels separately (see
/// [`super::RawEvent`]).
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub actor: Option<EventActor>,
    pub repo: Option<EventRepo>,
    pub payload: Option<PushPayload>,
    pub public: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

impl EventData {
    pub fn actor_login(&self) -> Option<&str> {
        self.actor.as_ref().and_then(|a| a.login.as_deref())
    }

    pub fn actor_url(&self) -> Option<&str> {
        self.actor.as_ref().and_then(|a| a.url.as_deref())
    }

    /// The `owner/name` composite as delivered by the events API.
    pub fn repo_full_name(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|r| r.name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventActor {
    pub id: Option<i64>,
    pub login: Option<String>,
    pub display_login: Option<String>,
    pub url: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRepo {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    pub repository_id: Option<i64>,
    pub push_id: Option<i64>,
    pub size: Option<i64>,
    pub distinct_size: Option<i64>,
    pub r#ref: Option<String>,
    pub head: Option<String>,
    pub before: Option<String>,
}

/// Full user record as served by `GET /users/{login}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserData {
    pub id: i64,
    pub login: Option<String>,
    pub node_id: Option<String>,
    pub avatar_url: Option<String>,
    pub gravatar_id: Option<String>,
    pub url: Option<String>,
    pub html_url: Option<String>,
    pub followers_url: Option<String>,
    pub following_url: Option<String>,
    pub gists_url: Option<String>,
    pub starred_url: Option<String>,
    pub subscriptions_url: Option<String>,
    pub organizations_url: Option<String>,
    pub repos_url: Option<String>,
    pub events_url: Option<String>,
    pub received_events_url: Option<String>,
    #[serde(rename = "type")]
    pub user_type: Option<String>,
    pub site_admin: Option<bool>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub hireable: Option<bool>,
    pub bio: Option<String>,
    pub twitter_username: Option<String>,
    pub public_repos: Option<i32>,
    pub public_gists: Option<i32>,
    pub followers: Option<i32>,
    pub following: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Owner object nested inside a repository payload; only the identifier is
/// flattened into the repositories table.
#[derive(Debug, Clone, Deserialize)]
pub struct OwnerData {
    pub id: Option<i64>,
    pub login: Option<String>,
    #[serde(rename = "type")]
    pub owner_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LicenseData {
    pub key: Option<String>,
    pub name: Option<String>,
    pub spdx_id: Option<String>,
    pub url: Option<String>,
    pub node_id: Option<String>,
}

/// Full repository record as served by `GET /repos/{owner}/{name}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryData {
    pub id: i64,
    pub node_id: Option<String>,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub private: Option<bool>,
    pub owner: Option<OwnerData>,
    pub html_url: Option<String>,
    pub description: Option<String>,
    pub fork: Option<bool>,
    pub url: Option<String>,
    pub archive_url: Option<String>,
    pub assignees_url: Option<String>,
    pub blobs_url: Option<String>,
    pub branches_url: Option<String>,
    pub collaborators_url: Option<String>,
    pub comments_url: Option<String>,
    pub commits_url: Option<String>,
    pub compare_url: Option<String>,
    pub contents_url: Option<String>,
    pub contributors_url: Option<String>,
    pub deployments_url: Option<String>,
    pub downloads_url: Option<String>,
    pub events_url: Option<String>,
    pub forks_url: Option<String>,
    pub git_commits_url: Option<String>,
    pub git_refs_url: Option<String>,
    pub git_tags_url: Option<String>,
    pub git_url: Option<String>,
    pub issue_comment_url: Option<String>,
    pub issue_events_url: Option<String>,
    pub issues_url: Option<String>,
    pub keys_url: Option<String>,
    pub labels_url: Option<String>,
    pub languages_url: Option<String>,
    pub merges_url: Option<String>,
    pub milestones_url: Option<String>,
    pub notifications_url: Option<String>,
    pub pulls_url: Option<String>,
    pub releases_url: Option<String>,
    pub ssh_url: Option<String>,
    pub stargazers_url: Option<String>,
    pub statuses_url: Option<String>,
    pub subscribers_url: Option<String>,
    pub subscription_url: Option<String>,
    pub tags_url: Option<String>,
    pub teams_url: Option<String>,
    pub trees_url: Option<String>,
    pub clone_url: Option<String>,
    pub mirror_url: Option<String>,
    pub hooks_url: Option<String>,
    pub svn_url: Option<String>,
    pub homepage: Option<String>,
    pub language: Option<String>,
    pub forks_count: Option<i32>,
    pub stargazers_count: Option<i32>,
    pub watchers_count: Option<i32>,
    pub size: Option<i32>,
    pub default_branch: Option<String>,
    pub open_issues_count: Option<i32>,
    pub is_template: Option<bool>,
    pub topics: Option<Vec<String>>,
    pub has_issues: Option<bool>,
    pub has_projects: Option<bool>,
    pub has_wiki: Option<bool>,
    pub has_pages: Option<bool>,
    pub has_downloads: Option<bool>,
    pub has_discussions: Option<bool>,
    pub archived: Option<bool>,
    pub disabled: Option<bool>,
    pub visibility: Option<String>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub license: Option<LicenseData>,
    pub allow_forking: Option<bool>,
    pub web_commit_signoff_required: Option<bool>,
    pub subscribers_count: Option<i32>,
    pub network_count: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Full organization record as served by `GET /orgs/{login}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationData {
    pub id: i64,
    pub login: Option<String>,
    pub node_id: Option<String>,
    pub url: Option<String>,
    pub html_url: Option<String>,
    pub repos_url: Option<String>,
    pub events_url: Option<String>,
    pub hooks_url: Option<String>,
    pub issues_url: Option<String>,
    pub members_url: Option<String>,
    pub public_members_url: Option<String>,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub twitter_username: Option<String>,
    pub is_verified: Option<bool>,
    pub has_organization_projects: Option<bool>,
    pub has_repository_projects: Option<bool>,
    pub public_repos: Option<i32>,
    pub public_gists: Option<i32>,
    pub followers: Option<i32>,
    pub following: Option<i32>,
    #[serde(rename = "type")]
    pub org_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
