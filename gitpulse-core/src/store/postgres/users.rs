use crate::github::UserData;
use crate::models::UserRecord;
use crate::store::{StoreError, UserStore};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE login = $1")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn save(&self, data: &UserData) -> Result<UserRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = $1")
            .bind(data.id)
            .fetch_optional(&mut *tx)
            .await?;

        let row = if exists.is_some() {
            update_user(&mut tx, data).await?
        } else {
            match insert_user(&mut tx, data).await? {
                Some(row) => row,
                // Lost the insert race to a concurrent saver; the row exists
                // now, so fall through to last-writer-wins.
                None => update_user(&mut tx, data).await?,
            }
        };

        tx.commit().await?;
        debug!(id = data.id, login = ?data.login, "saved user");
        Ok(row)
    }

    async fn set_avatar_key(&self, user_id: i64, key: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE users SET avatar_blob_key = $2, updated_at = now() WHERE id = $1")
                .bind(user_id)
                .bind(key)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO users (
        id, login, node_id, avatar_url, gravatar_id, url, html_url,
        followers_url, following_url, gists_url, starred_url,
        subscriptions_url, organizations_url, repos_url, events_url,
        received_events_url, user_type, site_admin, name, company, blog,
        location, email, hireable, bio, twitter_username, public_repos,
        public_gists, followers, following, remote_created_at,
        remote_updated_at
    )
    VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
        $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
        $29, $30, $31, $32
    )
    ON CONFLICT (id) DO NOTHING
    RETURNING *
"#;

const UPDATE_SQL: &str = r#"
    UPDATE users SET
        login = $2, node_id = $3, avatar_url = $4, gravatar_id = $5,
        url = $6, html_url = $7, followers_url = $8, following_url = $9,
        gists_url = $10, starred_url = $11, subscriptions_url = $12,
        organizations_url = $13, repos_url = $14, events_url = $15,
        received_events_url = $16, user_type = $17, site_admin = $18,
        name = $19, company = $20, blog = $21, location = $22,
        email = $23, hireable = $24, bio = $25, twitter_username = $26,
        public_repos = $27, public_gists = $28, followers = $29,
        following = $30, remote_created_at = $31, remote_updated_at = $32,
        updated_at = now()
    WHERE id = $1
    RETURNING *
"#;

// The avatar_blob_key column is deliberately absent from both statements:
// only the avatar pipeline writes it, and a refresh must not clear it.
macro_rules! bind_user {
    ($query:expr, $data:expr) => {{
        let data = $data;
        $query
            .bind(data.id)
            .bind(&data.login)
            .bind(&data.node_id)
            .bind(&data.avatar_url)
            .bind(&data.gravatar_id)
            .bind(&data.url)
            .bind(&data.html_url)
            .bind(&data.followers_url)
            .bind(&data.following_url)
            .bind(&data.gists_url)
            .bind(&data.starred_url)
            .bind(&data.subscriptions_url)
            .bind(&data.organizations_url)
            .bind(&data.repos_url)
            .bind(&data.events_url)
            .bind(&data.received_events_url)
            .bind(&data.user_type)
            .bind(data.site_admin)
            .bind(&data.name)
            .bind(&data.company)
            .bind(&data.blog)
            .bind(&data.location)
            .bind(&data.email)
            .bind(data.hireable)
            .bind(&data.bio)
            .bind(&data.twitter_username)
            .bind(data.public_repos)
            .bind(data.public_gists)
            .bind(data.followers)
            .bind(data.following)
            .bind(data.created_at)
            .bind(data.updated_at)
    }};
}

async fn insert_user(
    conn: &mut PgConnection,
    data: &UserData,
) -> Result<Option<UserRecord>, StoreError> {
    let row = bind_user!(sqlx::query_as::<_, UserRecord>(INSERT_SQL), data)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

async fn update_user(conn: &mut PgConnection, data: &UserData) -> Result<UserRecord, StoreError> {
    let row = bind_user!(sqlx::query_as::<_, UserRecord>(UPDATE_SQL), data)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row)
}
