use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use dialgate_core::calls::AgentEffect;
use dialgate_core::domain::agent::{
    normalize_phone_number, Agent, AgentCallStatus, AgentId, ProviderType, WorkflowHosting,
};
use dialgate_core::domain::call::{CallSid, CallStatus};

use super::rows::parse_timestamp;
use super::{AgentRepository, RepositoryError};
use crate::DbPool;

const AGENT_COLUMNS: &str = "id, user_id, name, provider, hosting, phone_number, secret_hash,
    secret_ciphertext, call_status, active_call_sid, created_at, updated_at";

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<Agent>, RepositoryError> {
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agent WHERE {filter} ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;

        row.map(agent_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        self.find_one("id = ?", &id.0).await
    }

    async fn find_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<Agent>, RepositoryError> {
        let digits = normalize_phone_number(phone_number);
        if digits.is_empty() {
            return Ok(None);
        }
        self.find_one("phone_digits = ?", &digits).await
    }

    async fn find_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<Agent>, RepositoryError> {
        self.find_one("secret_hash = ?", &secret_hash.trim().to_ascii_lowercase()).await
    }

    async fn create(&self, agent: Agent) -> Result<(), RepositoryError> {
        let phone_digits = agent
            .phone_number
            .as_deref()
            .map(normalize_phone_number)
            .filter(|digits| !digits.is_empty());

        sqlx::query(
            "INSERT INTO agent (
                id,
                user_id,
                name,
                provider,
                hosting,
                phone_number,
                phone_digits,
                secret_hash,
                secret_ciphertext,
                call_status,
                active_call_sid,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.id.0)
        .bind(&agent.user_id)
        .bind(&agent.name)
        .bind(agent.provider.as_str())
        .bind(agent.hosting.as_str())
        .bind(agent.phone_number.as_deref())
        .bind(phone_digits)
        .bind(&agent.secret_hash)
        .bind(agent.secret_ciphertext.as_deref())
        .bind(agent.call_status.as_str())
        .bind(agent.active_call_sid.as_deref())
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_call(
        &self,
        id: &AgentId,
        call_sid: &CallSid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE agent
             SET active_call_sid = ?1, call_status = 'ringing', updated_at = ?2
             WHERE id = ?3
               AND (
                   active_call_sid IS NULL
                   OR active_call_sid = ?1
                   OR EXISTS (
                       SELECT 1 FROM call_session
                       WHERE call_session.call_sid = agent.active_call_sid
                         AND call_session.status_rank = ?4
                   )
               )",
        )
        .bind(&call_sid.0)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .bind(CallStatus::Completed.rank())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn apply_call_effect(
        &self,
        id: &AgentId,
        call_sid: &CallSid,
        effect: AgentEffect,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let (sql, status) = match effect {
            AgentEffect::Release(status) => (
                "UPDATE agent
                 SET active_call_sid = NULL, call_status = ?1, updated_at = ?2
                 WHERE id = ?3 AND active_call_sid = ?4",
                status,
            ),
            AgentEffect::Mirror(status) => (
                "UPDATE agent
                 SET call_status = ?1, updated_at = ?2
                 WHERE id = ?3 AND active_call_sid = ?4",
                status,
            ),
            AgentEffect::Unchanged => return Ok(false),
        };

        let result = sqlx::query(sql)
            .bind(status.as_str())
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .bind(&call_sid.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn agent_from_row(row: SqliteRow) -> Result<Agent, RepositoryError> {
    let provider_raw = row.try_get::<String, _>("provider")?;
    let provider = ProviderType::parse(&provider_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown provider `{provider_raw}`")))?;
    let hosting_raw = row.try_get::<String, _>("hosting")?;
    let hosting = WorkflowHosting::parse(&hosting_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown hosting `{hosting_raw}`")))?;

    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        provider,
        hosting,
        phone_number: row.try_get("phone_number")?,
        secret_hash: row.try_get("secret_hash")?,
        secret_ciphertext: row.try_get("secret_ciphertext")?,
        call_status: AgentCallStatus::parse(&row.try_get::<String, _>("call_status")?),
        active_call_sid: row.try_get("active_call_sid")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
