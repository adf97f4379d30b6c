use crate::github::RepositoryData;
use crate::models::RepositoryRecord;
use crate::store::{RepoStore, StoreError};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct PostgresRepoStore {
    pool: PgPool,
}

impl PostgresRepoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoStore for PostgresRepoStore {
    async fn find_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<RepositoryRecord>, StoreError> {
        let row = sqlx::query_as::<_, RepositoryRecord>(
            "SELECT * FROM repositories WHERE full_name = $1",
        )
        .bind(full_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save(&self, data: &RepositoryData) -> Result<RepositoryRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM repositories WHERE id = $1")
            .bind(data.id)
            .fetch_optional(&mut *tx)
            .await?;

        let row = if exists.is_some() {
            update_repository(&mut tx, data).await?
        } else {
            match insert_repository(&mut tx, data).await? {
                Some(row) => row,
                // Lost the insert race to a concurrent saver; the row exists
                // now, so fall through to last-writer-wins.
                None => update_repository(&mut tx, data).await?,
            }
        };

        tx.commit().await?;
        debug!(id = data.id, full_name = ?data.full_name, "saved repository");
        Ok(row)
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO repositories (
        id, node_id, name, full_name, private, owner_id, html_url,
        description, fork, url, archive_url, assignees_url, blobs_url,
        branches_url, collaborators_url, comments_url, commits_url,
        compare_url, contents_url, contributors_url, deployments_url,
        downloads_url, events_url, forks_url, git_commits_url, git_refs_url,
        git_tags_url, git_url, issue_comment_url, issue_events_url,
        issues_url, keys_url, labels_url, languages_url, merges_url,
        milestones_url, notifications_url, pulls_url, releases_url, ssh_url,
        stargazers_url, statuses_url, subscribers_url, subscription_url,
        tags_url, teams_url, trees_url, clone_url, mirror_url, hooks_url,
        svn_url, homepage, language, forks_count, stargazers_count,
        watchers_count, size, default_branch, open_issues_count, is_template,
        topics, has_issues, has_projects, has_wiki, has_pages, has_downloads,
        has_discussions, archived, disabled, visibility, pushed_at,
        license_key, license_name, license_spdx_id, license_url,
        license_node_id, allow_forking, web_commit_signoff_required,
        subscribers_count, network_count, remote_created_at, remote_updated_at
    )
    VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
        $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
        $29, $30, $31, $32, $33, $34, $35, $36, $37, $38, $39, $40, $41,
        $42, $43, $44, $45, $46, $47, $48, $49, $50, $51, $52, $53, $54,
        $55, $56, $57, $58, $59, $60, $61, $62, $63, $64, $65, $66, $67,
        $68, $69, $70, $71, $72, $73, $74, $75, $76, $77, $78, $79, $80,
        $81, $82
    )
    ON CONFLICT (id) DO NOTHING
    RETURNING *
"#;

const UPDATE_SQL: &str = r#"
    UPDATE repositories SET
        node_id = $2, name = $3, full_name = $4, private = $5, owner_id = $6,
        html_url = $7, description = $8, fork = $9, url = $10,
        archive_url = $11, assignees_url = $12, blobs_url = $13,
        branches_url = $14, collaborators_url = $15, comments_url = $16,
        commits_url = $17, compare_url = $18, contents_url = $19,
        contributors_url = $20, deployments_url = $21, downloads_url = $22,
        events_url = $23, forks_url = $24, git_commits_url = $25,
        git_refs_url = $26, git_tags_url = $27, git_url = $28,
        issue_comment_url = $29, issue_events_url = $30, issues_url = $31,
        keys_url = $32, labels_url = $33, languages_url = $34,
        merges_url = $35, milestones_url = $36, notifications_url = $37,
        pulls_url = $38, releases_url = $39, ssh_url = $40,
        stargazers_url = $41, statuses_url = $42, subscribers_url = $43,
        subscription_url = $44, tags_url = $45, teams_url = $46,
        trees_url = $47, clone_url = $48, mirror_url = $49, hooks_url = $50,
        svn_url = $51, homepage = $52, language = $53, forks_count = $54,
        stargazers_count = $55, watchers_count = $56, size = $57,
        default_branch = $58, open_issues_count = $59, is_template = $60,
        topics = $61, has_issues = $62, has_projects = $63, has_wiki = $64,
        has_pages = $65, has_downloads = $66, has_discussions = $67,
        archived = $68, disabled = $69, visibility = $70, pushed_at = $71,
        license_key = $72, license_name = $73, license_spdx_id = $74,
        license_url = $75, license_node_id = $76, allow_forking = $77,
        web_commit_signoff_required = $78, subscribers_count = $79,
        network_count = $80, remote_created_at = $81,
        remote_updated_at = $82, updated_at = now()
    WHERE id = $1
    RETURNING *
"#;

// Bind every mapped column in the $1..$82 order shared by both statements;
// the nested owner and license objects flatten here.
macro_rules! bind_repository {
    ($query:expr, $data:expr) => {{
        let data = $data;
        let license = data.license.as_ref();
        $query
            .bind(data.id)
            .bind(&data.node_id)
            .bind(&data.name)
            .bind(&data.full_name)
            .bind(data.private)
            .bind(data.owner.as_ref().and_then(|o| o.id))
            .bind(&data.html_url)
            .bind(&data.description)
            .bind(data.fork)
            .bind(&data.url)
            .bind(&data.archive_url)
            .bind(&data.assignees_url)
            .bind(&data.blobs_url)
            .bind(&data.branches_url)
            .bind(&data.collaborators_url)
            .bind(&data.comments_url)
            .bind(&data.commits_url)
            .bind(&data.compare_url)
            .bind(&data.contents_url)
            .bind(&data.contributors_url)
            .bind(&data.deployments_url)
            .bind(&data.downloads_url)
            .bind(&data.events_url)
            .bind(&data.forks_url)
            .bind(&data.git_commits_url)
            .bind(&data.git_refs_url)
            .bind(&data.git_tags_url)
            .bind(&data.git_url)
            .bind(&data.issue_comment_url)
            .bind(&data.issue_events_url)
            .bind(&data.issues_url)
            .bind(&data.keys_url)
            .bind(&data.labels_url)
            .bind(&data.languages_url)
            .bind(&data.merges_url)
            .bind(&data.milestones_url)
            .bind(&data.notifications_url)
            .bind(&data.pulls_url)
            .bind(&data.releases_url)
            .bind(&data.ssh_url)
            .bind(&data.stargazers_url)
            .bind(&data.statuses_url)
            .bind(&data.subscribers_url)
            .bind(&data.subscription_url)
            .bind(&data.tags_url)
            .bind(&data.teams_url)
            .bind(&data.trees_url)
            .bind(&data.clone_url)
            .bind(&data.mirror_url)
            .bind(&data.hooks_url)
            .bind(&data.svn_url)
            .bind(&data.homepage)
            .bind(&data.language)
            .bind(data.forks_count)
            .bind(data.stargazers_count)
            .bind(data.watchers_count)
            .bind(data.size)
            .bind(&data.default_branch)
            .bind(data.open_issues_count)
            .bind(data.is_template)
            .bind(&data.topics)
            .bind(data.has_issues)
            .bind(data.has_projects)
            .bind(data.has_wiki)
            .bind(data.has_pages)
            .bind(data.has_downloads)
            .bind(data.has_discussions)
            .bind(data.archived)
            .bind(data.disabled)
            .bind(&data.visibility)
            .bind(data.pushed_at)
            .bind(license.and_then(|l| l.key.clone()))
            .bind(license.and_then(|l| l.name.clone()))
            .bind(license.and_then(|l| l.spdx_id.clone()))
            .bind(license.and_then(|l| l.url.clone()))
            .bind(license.and_then(|l| l.node_id.clone()))
            .bind(data.allow_forking)
            .bind(data.web_commit_signoff_required)
            .bind(data.subscribers_count)
            .bind(data.network_count)
            .bind(data.created_at)
            .bind(data.updated_at)
    }};
}

async fn insert_repository(
    conn: &mut PgConnection,
    data: &RepositoryData,
) -> Result<Option<RepositoryRecord>, StoreError> {
    let row = bind_repository!(sqlx::query_as::<_, RepositoryRecord>(INSERT_SQL), data)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

async fn update_repository(
    conn: &mut PgConnection,
    data: &RepositoryData,
) -> Result<RepositoryRecord, StoreError> {
    let row = bind_repository!(sqlx::query_as::<_, RepositoryRecord>(UPDATE_SQL), data)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row)
}
