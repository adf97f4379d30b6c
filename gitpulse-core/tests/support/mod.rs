//! Shared test doubles: in-memory stores with the same idempotency semantics
//! as the Postgres savers, a canned upstream API, and a canned downloader.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use gitpulse_core::download::{DownloadError, DownloadOutcome, Downloader, HeadInfo};
use gitpulse_core::github::{
    ApiError, EventData, GithubApi, OrganizationData, RawEvent, RepositoryData, UserData,
};
use gitpulse_core::models::{
    OrganizationRecord, PushEventRecord, RepositoryRecord, UserRecord,
};
use gitpulse_core::store::{EventStore, NewPushEvent, OrgStore, RepoStore, StoreError, UserStore};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub fn raw_event(json: &str) -> RawEvent {
    let data: EventData = serde_json::from_str(json).expect("test event json");
    RawEvent {
        raw: json.to_string(),
        data,
    }
}

pub fn user_data(json: serde_json::Value) -> UserData {
    serde_json::from_value(json).expect("test user json")
}

pub fn repository_data(json: serde_json::Value) -> RepositoryData {
    serde_json::from_value(json).expect("test repository json")
}

pub fn organization_data(json: serde_json::Value) -> OrganizationData {
    serde_json::from_value(json).expect("test organization json")
}

/// A user row with every optional column empty; tests fill in what they need.
pub fn bare_user_record(id: i64, login: &str) -> UserRecord {
    UserRecord {
        id,
        login: Some(login.to_string()),
        node_id: None,
        avatar_url: None,
        gravatar_id: None,
        url: None,
        html_url: None,
        followers_url: None,
        following_url: None,
        gists_url: None,
        starred_url: None,
        subscriptions_url: None,
        organizations_url: None,
        repos_url: None,
        events_url: None,
        received_events_url: None,
        user_type: None,
        site_admin: None,
        name: None,
        company: None,
        blog: None,
        location: None,
        email: None,
        hireable: None,
        bio: None,
        twitter_username: None,
        public_repos: None,
        public_gists: None,
        followers: None,
        following: None,
        remote_created_at: None,
        remote_updated_at: None,
        avatar_blob_key: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn user_record_from(data: &UserData, existing: Option<&UserRecord>) -> UserRecord {
    let now = Utc::now();
    UserRecord {
        id: data.id,
        login: data.login.clone(),
        node_id: data.node_id.clone(),
        avatar_url: data.avatar_url.clone(),
        gravatar_id: data.gravatar_id.clone(),
        url: data.url.clone(),
        html_url: data.html_url.clone(),
        followers_url: data.followers_url.clone(),
        following_url: data.following_url.clone(),
        gists_url: data.gists_url.clone(),
        starred_url: data.starred_url.clone(),
        subscriptions_url: data.subscriptions_url.clone(),
        organizations_url: data.organizations_url.clone(),
        repos_url: data.repos_url.clone(),
        events_url: data.events_url.clone(),
        received_events_url: data.received_events_url.clone(),
        user_type: data.user_type.clone(),
        site_admin: data.site_admin,
        name: data.name.clone(),
        company: data.company.clone(),
        blog: data.blog.clone(),
        location: data.location.clone(),
        email: data.email.clone(),
        hireable: data.hireable,
        bio: data.bio.clone(),
        twitter_username: data.twitter_username.clone(),
        public_repos: data.public_repos,
        public_gists: data.public_gists,
        followers: data.followers,
        following: data.following,
        remote_created_at: data.created_at,
        remote_updated_at: data.updated_at,
        avatar_blob_key: existing.and_then(|e| e.avatar_blob_key.clone()),
        created_at: existing.map(|e| e.created_at).unwrap_or(now),
        updated_at: now,
    }
}

fn repository_record_from(data: &RepositoryData, existing: Option<&RepositoryRecord>) -> RepositoryRecord {
    let now = Utc::now();
    let license = data.license.as_ref();
    RepositoryRecord {
        id: data.id,
        node_id: data.node_id.clone(),
        name: data.name.clone(),
        full_name: data.full_name.clone(),
        private: data.private,
        owner_id: data.owner.as_ref().and_then(|o| o.id),
        html_url: data.html_url.clone(),
        description: data.description.clone(),
        fork: data.fork,
        url: data.url.clone(),
        archive_url: data.archive_url.clone(),
        assignees_url: data.assignees_url.clone(),
        blobs_url: data.blobs_url.clone(),
        branches_url: data.branches_url.clone(),
        collaborators_url: data.collaborators_url.clone(),
        comments_url: data.comments_url.clone(),
        commits_url: data.commits_url.clone(),
        compare_url: data.compare_url.clone(),
        contents_url: data.contents_url.clone(),
        contributors_url: data.contributors_url.clone(),
        deployments_url: data.deployments_url.clone(),
        downloads_url: data.downloads_url.clone(),
        events_url: data.events_url.clone(),
        forks_url: data.forks_url.clone(),
        git_commits_url: data.git_commits_url.clone(),
        git_refs_url: data.git_refs_url.clone(),
        git_tags_url: data.git_tags_url.clone(),
        git_url: data.git_url.clone(),
        issue_comment_url: data.issue_comment_url.clone(),
        issue_events_url: data.issue_events_url.clone(),
        issues_url: data.issues_url.clone(),
        keys_url: data.keys_url.clone(),
        labels_url: data.labels_url.clone(),
        languages_url: data.languages_url.clone(),
        merges_url: data.merges_url.clone(),
        milestones_url: data.milestones_url.clone(),
        notifications_url: data.notifications_url.clone(),
        pulls_url: data.pulls_url.clone(),
        releases_url: data.releases_url.clone(),
        ssh_url: data.ssh_url.clone(),
        stargazers_url: data.stargazers_url.clone(),
        statuses_url: data.statuses_url.clone(),
        subscribers_url: data.subscribers_url.clone(),
        subscription_url: data.subscription_url.clone(),
        tags_url: data.tags_url.clone(),
        teams_url: data.teams_url.clone(),
        trees_url: data.trees_url.clone(),
        clone_url: data.clone_url.clone(),
        mirror_url: data.mirror_url.clone(),
        hooks_url: data.hooks_url.clone(),
        svn_url: data.svn_url.clone(),
        homepage: data.homepage.clone(),
        language: data.language.clone(),
        forks_count: data.forks_count,
        stargazers_count: data.stargazers_count,
        watchers_count: data.watchers_count,
        size: data.size,
        default_branch: data.default_branch.clone(),
        open_issues_count: data.open_issues_count,
        is_template: data.is_template,
        topics: data.topics.clone(),
        has_issues: data.has_issues,
        has_projects: data.has_projects,
        has_wiki: data.has_wiki,
        has_pages: data.has_pages,
        has_downloads: data.has_downloads,
        has_discussions: data.has_discussions,
        archived: data.archived,
        disabled: data.disabled,
        visibility: data.visibility.clone(),
        pushed_at: data.pushed_at,
        license_key: license.and_then(|l| l.key.clone()),
        license_name: license.and_then(|l| l.name.clone()),
        license_spdx_id: license.and_then(|l| l.spdx_id.clone()),
        license_url: license.and_then(|l| l.url.clone()),
        license_node_id: license.and_then(|l| l.node_id.clone()),
        allow_forking: data.allow_forking,
        web_commit_signoff_required: data.web_commit_signoff_required,
        subscribers_count: data.subscribers_count,
        network_count: data.network_count,
        remote_created_at: data.created_at,
        remote_updated_at: data.updated_at,
        created_at: existing.map(|e| e.created_at).unwrap_or(now),
        updated_at: now,
    }
}

fn organization_record_from(
    data: &OrganizationData,
    existing: Option<&OrganizationRecord>,
) -> OrganizationRecord {
    let now = Utc::now();
    OrganizationRecord {
        id: data.id,
        login: data.login.clone(),
        node_id: data.node_id.clone(),
        url: data.url.clone(),
        html_url: data.html_url.clone(),
        repos_url: data.repos_url.clone(),
        events_url: data.events_url.clone(),
        hooks_url: data.hooks_url.clone(),
        issues_url: data.issues_url.clone(),
        members_url: data.members_url.clone(),
        public_members_url: data.public_members_url.clone(),
        avatar_url: data.avatar_url.clone(),
        description: data.description.clone(),
        name: data.name.clone(),
        company: data.company.clone(),
        blog: data.blog.clone(),
        location: data.location.clone(),
        email: data.email.clone(),
        twitter_username: data.twitter_username.clone(),
        is_verified: data.is_verified,
        has_organization_projects: data.has_organization_projects,
        has_repository_projects: data.has_repository_projects,
        public_repos: data.public_repos,
        public_gists: data.public_gists,
        followers: data.followers,
        following: data.following,
        org_type: data.org_type.clone(),
        remote_created_at: data.created_at,
        remote_updated_at: data.updated_at,
        created_at: existing.map(|e| e.created_at).unwrap_or(now),
        updated_at: now,
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    rows: Mutex<HashMap<String, PushEventRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, id: &str) -> Option<PushEventRecord> {
        self.rows.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn find_or_create(
        &self,
        event: NewPushEvent,
    ) -> Result<(PushEventRecord, bool), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.get(&event.id) {
            return Ok((existing.clone(), false));
        }
        let record = PushEventRecord {
            id: event.id.clone(),
            actor_id: event.actor_id,
            repository_id: event.repository_id,
            push_id: event.push_id,
            git_ref: event.git_ref,
            head: event.head,
            before: event.before,
            raw: event.raw,
            created_at: Utc::now(),
        };
        rows.insert(event.id, record.clone());
        Ok((record, true))
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<HashMap<i64, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: UserRecord) {
        self.rows.lock().unwrap().insert(record.id, record);
    }

    pub fn get(&self, id: i64) -> Option<UserRecord> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<UserRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|r| r.login.as_deref() == Some(login))
            .cloned())
    }

    async fn save(&self, data: &UserData) -> Result<UserRecord, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let record = user_record_from(data, rows.get(&data.id));
        rows.insert(data.id, record.clone());
        Ok(record)
    }

    async fn set_avatar_key(&self, user_id: i64, key: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&user_id) {
            Some(record) => {
                record.avatar_blob_key = Some(key.to_string());
                record.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user {user_id}"))),
        }
    }
}

#[derive(Default)]
pub struct MemoryRepoStore {
    rows: Mutex<HashMap<i64, RepositoryRecord>>,
}

impl MemoryRepoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<RepositoryRecord> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn find_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<RepositoryRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|r| r.full_name.as_deref() == Some(full_name))
            .cloned())
    }

    async fn save(&self, data: &RepositoryData) -> Result<RepositoryRecord, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let record = repository_record_from(data, rows.get(&data.id));
        rows.insert(data.id, record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct MemoryOrgStore {
    rows: Mutex<HashMap<i64, OrganizationRecord>>,
}

impl MemoryOrgStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<OrganizationRecord> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl OrgStore for MemoryOrgStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<OrganizationRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|r| r.login.as_deref() == Some(login))
            .cloned())
    }

    async fn save(&self, data: &OrganizationData) -> Result<OrganizationRecord, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let record = organization_record_from(data, rows.get(&data.id));
        rows.insert(data.id, record.clone());
        Ok(record)
    }
}

/// Canned upstream API with per-endpoint call counters.
#[derive(Default)]
pub struct StubApi {
    pub events: Mutex<Vec<RawEvent>>,
    pub users: Mutex<HashMap<String, UserData>>,
    pub repos: Mutex<HashMap<String, RepositoryData>>,
    pub orgs: Mutex<HashMap<String, OrganizationData>>,
    pub event_calls: AtomicUsize,
    pub user_calls: AtomicUsize,
    pub repo_calls: AtomicUsize,
    pub org_calls: AtomicUsize,
}

impl StubApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(self, events: Vec<RawEvent>) -> Self {
        *self.events.lock().unwrap() = events;
        self
    }

    pub fn with_user(self, data: UserData) -> Self {
        let login = data.login.clone().expect("stub user needs a login");
        self.users.lock().unwrap().insert(login, data);
        self
    }

    pub fn with_repository(self, full_name: &str, data: RepositoryData) -> Self {
        self.repos.lock().unwrap().insert(full_name.to_string(), data);
        self
    }

    pub fn with_organization(self, data: OrganizationData) -> Self {
        let login = data.login.clone().expect("stub org needs a login");
        self.orgs.lock().unwrap().insert(login, data);
        self
    }

    fn not_found() -> ApiError {
        ApiError::ClientError {
            status: 404,
            body: r#"{"message":"Not Found"}"#.to_string(),
        }
    }
}

#[async_trait]
impl GithubApi for StubApi {
    async fn list_public_events(&self) -> Result<Vec<RawEvent>, ApiError> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.events.lock().unwrap().clone())
    }

    async fn get_user(&self, login: &str) -> Result<UserData, ApiError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.users
            .lock()
            .unwrap()
            .get(login)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RepositoryData, ApiError> {
        self.repo_calls.fetch_add(1, Ordering::SeqCst);
        self.repos
            .lock()
            .unwrap()
            .get(&format!("{owner}/{name}"))
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn get_organization(&self, login: &str) -> Result<OrganizationData, ApiError> {
        self.org_calls.fetch_add(1, Ordering::SeqCst);
        self.orgs
            .lock()
            .unwrap()
            .get(login)
            .cloned()
            .ok_or_else(Self::not_found)
    }
}

/// Downloader that serves a fixed body, honoring the size cap.
pub struct StubDownloader {
    pub body: Vec<u8>,
    pub content_type: String,
    pub downloads: AtomicUsize,
}

impl StubDownloader {
    pub fn serving(body: &[u8], content_type: &str) -> Self {
        Self {
            body: body.to_vec(),
            content_type: content_type.to_string(),
            downloads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Downloader for StubDownloader {
    async fn head(&self, _url: &str) -> Result<HeadInfo, DownloadError> {
        Ok(HeadInfo {
            content_length: Some(self.body.len() as u64),
            content_type: self.content_type.clone(),
        })
    }

    async fn download(
        &self,
        _url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        max_size: Option<u64>,
    ) -> Result<DownloadOutcome, DownloadError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = max_size
            && self.body.len() as u64 > max
        {
            return Err(DownloadError::FileSizeExceeded { limit: max });
        }
        sink.write_all(&self.body)
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;
        Ok(DownloadOutcome {
            bytes_written: self.body.len() as u64,
            content_type: self.content_type.clone(),
        })
    }
}
