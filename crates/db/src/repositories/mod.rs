use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use dialgate_core::calls::{AgentEffect, StatusUpdate};
use dialgate_core::domain::activity::WebhookActivity;
use dialgate_core::domain::agent::{Agent, AgentId};
use dialgate_core::domain::call::{CallSession, CallSid};
use dialgate_core::domain::report::CallReport;
use dialgate_core::errors::CoreError;

pub mod activity;
pub mod agent;
pub mod call_report;
pub mod call_session;
pub mod memory;
pub mod rate_limit;
mod rows;

pub use activity::SqlActivityRepository;
pub use agent::SqlAgentRepository;
pub use call_report::SqlCallReportRepository;
pub use call_session::SqlCallSessionRepository;
pub use memory::{
    InMemoryActivityRepository, InMemoryAgentRepository, InMemoryCallReportRepository,
    InMemoryCallSessionRepository, InMemoryRateLimitStore,
};
pub use rate_limit::SqlRateLimitStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for CoreError {
    fn from(value: RepositoryError) -> Self {
        CoreError::transient_store(value.to_string())
    }
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;

    /// Matches on digits only; the oldest agent wins when several share a number.
    async fn find_by_phone_number(&self, phone_number: &str)
        -> Result<Option<Agent>, RepositoryError>;

    async fn find_by_secret_hash(&self, secret_hash: &str)
        -> Result<Option<Agent>, RepositoryError>;

    async fn create(&self, agent: Agent) -> Result<(), RepositoryError>;

    /// Opens `call_sid` on the agent and marks it ringing, unless another correlation id is
    /// still open. A held id whose session already reached a terminal status no longer counts
    /// as open and is taken over. Returns whether the claim holds.
    async fn claim_call(
        &self,
        id: &AgentId,
        call_sid: &CallSid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Applies the effect only while `call_sid` is still the agent's open call.
    async fn apply_call_effect(
        &self,
        id: &AgentId,
        call_sid: &CallSid,
        effect: AgentEffect,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait CallSessionRepository: Send + Sync {
    async fn find_by_sid(&self, call_sid: &CallSid) -> Result<Option<CallSession>, RepositoryError>;

    /// Returns `false` when a session with this correlation id already exists.
    async fn insert_if_absent(&self, session: CallSession) -> Result<bool, RepositoryError>;

    /// Merges the update in one conditional statement. `None` means no session matched.
    async fn apply_status(
        &self,
        update: &StatusUpdate,
    ) -> Result<Option<CallSession>, RepositoryError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn record_webhook(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<WebhookActivity, RepositoryError>;

    async fn find(&self, agent_id: &AgentId) -> Result<Option<WebhookActivity>, RepositoryError>;
}

#[async_trait]
pub trait CallReportRepository: Send + Sync {
    async fn save(&self, report: CallReport) -> Result<(), RepositoryError>;

    async fn list_for_agent(&self, agent_id: &AgentId) -> Result<Vec<CallReport>, RepositoryError>;
}

pub(crate) fn activity_window() -> Duration {
    Duration::hours(dialgate_core::domain::activity::ACTIVITY_WINDOW_HOURS)
}
