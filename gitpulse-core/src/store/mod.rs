//! Persistence ports and their Postgres implementations.
//!
//! The savers are the idempotency boundary of the whole pipeline: push
//! events are find-or-create (append-only), while user / repository /
//! organization rows are select-then-write with every non-key column
//! last-writer-wins. Concurrent saves of the same identifier converge on one
//! of the inputs because each write covers the whole record in one
//! statement.

pub mod postgres;

pub use postgres::{
    PostgresEventStore, PostgresOrgStore, PostgresRepoStore, PostgresUserStore,
};

use crate::github::{OrganizationData, RepositoryData, UserData};
use crate::models::{OrganizationRecord, PushEventRecord, RepositoryRecord, UserRecord};
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Postgres aborted the transaction to break a deadlock (SQLSTATE 40P01).
    pub fn is_deadlock(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("40P01")
            }
            _ => false,
        }
    }

    /// The connection to the database could not be established or was lost.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            StoreError::Database(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            )
        )
    }
}

/// Mapped attributes of a push event, ready for insertion.
#[derive(Debug, Clone)]
pub struct NewPushEvent {
    pub id: String,
    pub actor_id: Option<i64>,
    pub repository_id: Option<i64>,
    pub push_id: Option<i64>,
    pub git_ref: Option<String>,
    pub head: Option<String>,
    pub before: Option<String>,
    /// Verbatim upstream JSON for the whole event.
    pub raw: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert the event unless a row with the same id already exists. The
    /// boolean reports whether this call created the row.
    async fn find_or_create(&self, event: NewPushEvent)
    -> Result<(PushEventRecord, bool), StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_login(&self, login: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Write the full record: insert on first sight, update every non-key
    /// column otherwise.
    async fn save(&self, data: &UserData) -> Result<UserRecord, StoreError>;

    /// Point the user at a stored avatar blob. Fails with
    /// [`StoreError::NotFound`] when no such user row exists.
    async fn set_avatar_key(&self, user_id: i64, key: &str) -> Result<(), StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn find_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<RepositoryRecord>, StoreError>;

    async fn save(&self, data: &RepositoryData) -> Result<RepositoryRecord, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrgStore: Send + Sync {
    async fn find_by_login(&self, login: &str) -> Result<Option<OrganizationRecord>, StoreError>;

    async fn save(&self, data: &OrganizationData) -> Result<OrganizationRecord, StoreError>;
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
