use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use cater_core::outbox::{MirrorTask, OutboxEntry, OutboxStatus, OutboxStore};
use cater_core::{CoreError, CoreResult};

use crate::database::map_sqlx_error;

/// Durable queue of mirror writes that failed inline, kept in `mirror_outbox`.
pub struct PgOutbox {
    pool: PgPool,
}

impl PgOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    payload: Value,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
}

#[async_trait]
impl OutboxStore for PgOutbox {
    async fn enqueue(&self, task: &MirrorTask, error: &str) -> CoreResult<Uuid> {
        let id = Uuid::new_v4();
        let payload =
            serde_json::to_value(task).map_err(|e| CoreError::InternalError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO mirror_outbox (id, kind, payload, status, last_error)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(task.kind())
        .bind(payload)
        .bind(OutboxStatus::Pending.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn claim_due(&self, limit: u32) -> CoreResult<Vec<OutboxEntry>> {
        // Claimed rows are leased for a minute
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE mirror_outbox SET next_attempt_at = NOW() + INTERVAL '60 seconds'
            WHERE id IN (
                SELECT id FROM mirror_outbox
                WHERE status = $1 AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts, next_attempt_at, last_error
            "#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<MirrorTask>(row.payload) {
                Ok(task) => entries.push(OutboxEntry {
                    id: row.id,
                    task,
                    attempts: u32::try_from(row.attempts).unwrap_or_default(),
                    next_attempt_at: row.next_attempt_at,
                    last_error: row.last_error,
                }),
                Err(e) => {
                    warn!(outbox_id = %row.id, "Unreadable outbox payload, burying: {}", e);
                    self.bury(row.id, u32::try_from(row.attempts).unwrap_or_default(), &e.to_string())
                        .await?;
                }
            }
        }

        Ok(entries)
    }

    async fn complete(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM mirror_outbox WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE mirror_outbox
            SET attempts = $2, next_attempt_at = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn bury(&self, id: Uuid, attempts: u32, error: &str) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE mirror_outbox
            SET status = $2, attempts = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(OutboxStatus::Dead.as_str())
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
