use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use dialgate_core::domain::activity::WebhookActivity;
use dialgate_core::domain::agent::AgentId;

use super::rows::{from_millis, parse_u32};
use super::{activity_window, ActivityRepository, RepositoryError};
use crate::DbPool;

pub struct SqlActivityRepository {
    pool: DbPool,
}

impl SqlActivityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActivityRepository for SqlActivityRepository {
    async fn record_webhook(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<WebhookActivity, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO webhook_activity (agent_id, last_received_at_ms, window_started_at_ms, count_24h)
             VALUES (?1, ?2, ?2, 1)
             ON CONFLICT(agent_id) DO UPDATE SET
                last_received_at_ms = excluded.last_received_at_ms,
                count_24h = CASE
                    WHEN webhook_activity.window_started_at_ms + ?3 <= excluded.last_received_at_ms THEN 1
                    ELSE webhook_activity.count_24h + 1
                END,
                window_started_at_ms = CASE
                    WHEN webhook_activity.window_started_at_ms + ?3 <= excluded.last_received_at_ms
                    THEN excluded.window_started_at_ms
                    ELSE webhook_activity.window_started_at_ms
                END
             RETURNING agent_id, last_received_at_ms, window_started_at_ms, count_24h",
        )
        .bind(&agent_id.0)
        .bind(now.timestamp_millis())
        .bind(activity_window().num_milliseconds())
        .fetch_one(&self.pool)
        .await?;

        activity_from_row(row)
    }

    async fn find(&self, agent_id: &AgentId) -> Result<Option<WebhookActivity>, RepositoryError> {
        let row = sqlx::query(
            "SELECT agent_id, last_received_at_ms, window_started_at_ms, count_24h
             FROM webhook_activity
             WHERE agent_id = ?",
        )
        .bind(&agent_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(activity_from_row).transpose()
    }
}

fn activity_from_row(row: SqliteRow) -> Result<WebhookActivity, RepositoryError> {
    Ok(WebhookActivity {
        agent_id: AgentId(row.try_get("agent_id")?),
        last_received_at: from_millis("last_received_at_ms", row.try_get("last_received_at_ms")?)?,
        window_started_at: from_millis(
            "window_started_at_ms",
            row.try_get("window_started_at_ms")?,
        )?,
        count_24h: parse_u32("count_24h", row.try_get("count_24h")?)?,
    })
}
