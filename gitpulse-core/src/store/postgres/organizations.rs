use crate::github::OrganizationData;
use crate::models::OrganizationRecord;
use crate::store::{OrgStore, StoreError};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct PostgresOrgStore {
    pool: PgPool,
}

impl PostgresOrgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrgStore for PostgresOrgStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<OrganizationRecord>, StoreError> {
        let row = sqlx::query_as::<_, OrganizationRecord>(
            "SELECT * FROM organizations WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save(&self, data: &OrganizationData) -> Result<OrganizationRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM organizations WHERE id = $1")
            .bind(data.id)
            .fetch_optional(&mut *tx)
            .await?;

        let row = if exists.is_some() {
            update_organization(&mut tx, data).await?
        } else {
            match insert_organization(&mut tx, data).await? {
                Some(row) => row,
                None => update_organization(&mut tx, data).await?,
            }
        };

        tx.commit().await?;
        debug!(id = data.id, login = ?data.login, "saved organization");
        Ok(row)
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO organizations (
        id, login, node_id, url, html_url, repos_url, events_url, hooks_url,
        issues_url, members_url, public_members_url, avatar_url, description,
        name, company, blog, location, email, twitter_username, is_verified,
        has_organization_projects, has_repository_projects, public_repos,
        public_gists, followers, following, org_type, remote_created_at,
        remote_updated_at
    )
    VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
        $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
    )
    ON CONFLICT (id) DO NOTHING
    RETURNING *
"#;

const UPDATE_SQL: &str = r#"
    UPDATE organizations SET
        login = $2, node_id = $3, url = $4, html_url = $5, repos_url = $6,
        events_url = $7, hooks_url = $8, issues_url = $9, members_url = $10,
        public_members_url = $11, avatar_url = $12, description = $13,
        name = $14, company = $15, blog = $16, location = $17, email = $18,
        twitter_username = $19, is_verified = $20,
        has_organization_projects = $21, has_repository_projects = $22,
        public_repos = $23, public_gists = $24, followers = $25,
        following = $26, org_type = $27, remote_created_at = $28,
        remote_updated_at = $29, updated_at = now()
    WHERE id = $1
    RETURNING *
"#;

macro_rules! bind_organization {
    ($query:expr, $data:expr) => {{
        let data = $data;
        $query
            .bind(data.id)
            .bind(&data.login)
            .bind(&data.node_id)
            .bind(&data.url)
            .bind(&data.html_url)
            .bind(&data.repos_url)
            .bind(&data.events_url)
            .bind(&data.hooks_url)
            .bind(&data.issues_url)
            .bind(&data.members_url)
            .bind(&data.public_members_url)
            .bind(&data.avatar_url)
            .bind(&data.description)
            .bind(&data.name)
            .bind(&data.company)
            .bind(&data.blog)
            .bind(&data.location)
            .bind(&data.email)
            .bind(&data.twitter_username)
            .bind(data.is_verified)
            .bind(data.has_organization_projects)
            .bind(data.has_repository_projects)
            .bind(data.public_repos)
            .bind(data.public_gists)
            .bind(data.followers)
            .bind(data.following)
            .bind(&data.org_type)
            .bind(data.created_at)
            .bind(data.updated_at)
    }};
}

async fn insert_organization(
    conn: &mut PgConnection,
    data: &OrganizationData,
) -> Result<Option<OrganizationRecord>, StoreError> {
    let row = bind_organization!(sqlx::query_as::<_, OrganizationRecord>(INSERT_SQL), data)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

async fn update_organization(
    conn: &mut PgConnection,
    data: &OrganizationData,
) -> Result<OrganizationRecord, StoreError> {
    let row = bind_organization!(sqlx::query_as::<_, OrganizationRecord>(UPDATE_SQL), data)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row)
}
