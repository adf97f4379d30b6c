use crate::models::PushEventRecord;
use crate::store::{EventStore, NewPushEvent, StoreError};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn find_or_create(
        &self,
        event: NewPushEvent,
    ) -> Result<(PushEventRecord, bool), StoreError> {
        let inserted = sqlx::query_as::<_, PushEventRecord>(
            r#"
            INSERT INTO push_events (id, actor_id, repository_id, push_id, ref, head, before, raw)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&event.id)
        .bind(event.actor_id)
        .bind(event.repository_id)
        .bind(event.push_id)
        .bind(&event.git_ref)
        .bind(&event.head)
        .bind(&event.before)
        .bind(&event.raw)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        // Conflict: someone got here first. The existing row wins and is
        // returned unchanged.
        debug!(id = %event.id, "push event already stored");
        let row = sqlx::query_as::<_, PushEventRecord>(
            "SELECT * FROM push_events WHERE id = $1",
        )
        .bind(&event.id)
        .fetch_one(&self.pool)
        .await?;

        Ok((row, false))
    }
}
