use sqlx::{sqlite::SqliteRow, Row};

use dialgate_core::domain::agent::AgentId;
use dialgate_core::domain::report::CallReport;

use super::rows::parse_timestamp;
use super::{CallReportRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCallReportRepository {
    pool: DbPool,
}

impl SqlCallReportRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CallReportRepository for SqlCallReportRepository {
    async fn save(&self, report: CallReport) -> Result<(), RepositoryError> {
        let structured_data_json = report
            .structured_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("structured_data: {error}")))?;

        sqlx::query(
            "INSERT INTO call_report (
                id,
                agent_id,
                phone,
                summary,
                recording_url,
                transcript,
                sentiment,
                structured_data_json,
                duration_secs,
                received_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&report.id)
        .bind(&report.agent_id.0)
        .bind(report.phone.as_deref())
        .bind(report.summary.as_deref())
        .bind(report.recording_url.as_deref())
        .bind(report.transcript.as_deref())
        .bind(report.sentiment.as_deref())
        .bind(structured_data_json)
        .bind(report.duration_secs)
        .bind(report.received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_agent(&self, agent_id: &AgentId) -> Result<Vec<CallReport>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                agent_id,
                phone,
                summary,
                recording_url,
                transcript,
                sentiment,
                structured_data_json,
                duration_secs,
                received_at
             FROM call_report
             WHERE agent_id = ?
             ORDER BY received_at ASC, id ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(report_from_row).collect()
    }
}

fn report_from_row(row: SqliteRow) -> Result<CallReport, RepositoryError> {
    let structured_data = row
        .try_get::<Option<String>, _>("structured_data_json")?
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid structured_data_json: {error}"))
            })
        })
        .transpose()?;

    Ok(CallReport {
        id: row.try_get("id")?,
        agent_id: AgentId(row.try_get("agent_id")?),
        phone: row.try_get("phone")?,
        summary: row.try_get("summary")?,
        recording_url: row.try_get("recording_url")?,
        transcript: row.try_get("transcript")?,
        sentiment: row.try_get("sentiment")?,
        structured_data,
        duration_secs: row.try_get("duration_secs")?,
        received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
    })
}
