use sqlx::{sqlite::SqliteRow, Row};

use dialgate_core::calls::StatusUpdate;
use dialgate_core::domain::agent::AgentId;
use dialgate_core::domain::call::{CallDirection, CallSession, CallSid, CallStatus};

use super::rows::{parse_optional_timestamp, parse_timestamp};
use super::{CallSessionRepository, RepositoryError};
use crate::DbPool;

const SESSION_COLUMNS: &str = "call_sid, agent_id, from_number, to_number, direction, status,
    started_at, ended_at, duration_secs, recording_url, recording_sid, updated_at";

pub struct SqlCallSessionRepository {
    pool: DbPool,
}

impl SqlCallSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CallSessionRepository for SqlCallSessionRepository {
    async fn find_by_sid(&self, call_sid: &CallSid) -> Result<Option<CallSession>, RepositoryError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM call_session WHERE call_sid = ?");
        let row = sqlx::query(&sql).bind(&call_sid.0).fetch_optional(&self.pool).await?;

        row.map(session_from_row).transpose()
    }

    async fn insert_if_absent(&self, session: CallSession) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO call_session (
                call_sid,
                agent_id,
                from_number,
                to_number,
                direction,
                status,
                status_rank,
                started_at,
                ended_at,
                duration_secs,
                recording_url,
                recording_sid,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(call_sid) DO NOTHING",
        )
        .bind(&session.call_sid.0)
        .bind(&session.agent_id.0)
        .bind(&session.from_number)
        .bind(&session.to_number)
        .bind(session.direction.as_str())
        .bind(session.status.as_str())
        .bind(session.status.rank())
        .bind(session.started_at.to_rfc3339())
        .bind(session.ended_at.map(|value| value.to_rfc3339()))
        .bind(session.duration_secs)
        .bind(session.recording_url.as_deref())
        .bind(session.recording_sid.as_deref())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn apply_status(
        &self,
        update: &StatusUpdate,
    ) -> Result<Option<CallSession>, RepositoryError> {
        // SET expressions all read the pre-update row, so `status_rank` below is the old rank.
        let sql = format!(
            "UPDATE call_session SET
                status = CASE WHEN status_rank < ?1 THEN ?2 ELSE status END,
                ended_at = CASE
                    WHEN ?2 = 'completed' AND status_rank < ?1 THEN COALESCE(ended_at, ?3)
                    ELSE ended_at
                END,
                duration_secs = COALESCE(?4, duration_secs),
                recording_url = COALESCE(?5, recording_url),
                recording_sid = COALESCE(?6, recording_sid),
                updated_at = CASE
                    WHEN status_rank < ?1
                      OR (?4 IS NOT NULL AND duration_secs IS NOT ?4)
                      OR (?5 IS NOT NULL AND recording_url IS NOT ?5)
                      OR (?6 IS NOT NULL AND recording_sid IS NOT ?6)
                    THEN ?3
                    ELSE updated_at
                END,
                status_rank = MAX(status_rank, ?1)
             WHERE call_sid = ?7
             RETURNING {SESSION_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(update.status.rank())
            .bind(update.status.as_str())
            .bind(update.observed_at.to_rfc3339())
            .bind(update.duration_secs)
            .bind(update.recording_url.as_deref())
            .bind(update.recording_sid.as_deref())
            .bind(&update.call_sid.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(session_from_row).transpose()
    }
}

fn session_from_row(row: SqliteRow) -> Result<CallSession, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = CallStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown call status `{status_raw}`")))?;

    Ok(CallSession {
        call_sid: CallSid(row.try_get("call_sid")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        from_number: row.try_get("from_number")?,
        to_number: row.try_get("to_number")?,
        direction: CallDirection::parse(&row.try_get::<String, _>("direction")?),
        status,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        ended_at: parse_optional_timestamp("ended_at", row.try_get("ended_at")?)?,
        duration_secs: row.try_get("duration_secs")?,
        recording_url: row.try_get("recording_url")?,
        recording_sid: row.try_get("recording_sid")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
