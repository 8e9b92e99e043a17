use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use dialgate_core::calls::{apply_status_update, AgentEffect, StatusUpdate};
use dialgate_core::domain::activity::WebhookActivity;
use dialgate_core::domain::agent::{normalize_phone_number, Agent, AgentCallStatus, AgentId};
use dialgate_core::domain::call::{CallSession, CallSid};
use dialgate_core::domain::report::CallReport;
use dialgate_core::errors::CoreError;
use dialgate_core::ratelimit::{RateLimitStore, WindowCount};

use super::{
    activity_window, ActivityRepository, AgentRepository, CallReportRepository,
    CallSessionRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
    sessions: Option<Arc<InMemoryCallSessionRepository>>,
}

impl InMemoryAgentRepository {
    /// Links the session store so claims can see when a held call has already ended.
    pub fn with_sessions(sessions: Arc<InMemoryCallSessionRepository>) -> Self {
        Self { agents: RwLock::default(), sessions: Some(sessions) }
    }

    async fn call_ended(&self, call_sid: &str) -> bool {
        let Some(sessions) = &self.sessions else {
            return false;
        };
        let sessions = sessions.sessions.read().await;
        sessions.get(call_sid).is_some_and(|session| session.status.is_terminal())
    }

    async fn find_first(&self, predicate: impl Fn(&Agent) -> bool) -> Option<Agent> {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|agent| predicate(agent))
            .min_by(|left, right| {
                left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
            })
            .cloned()
    }
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).cloned())
    }

    async fn find_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<Agent>, RepositoryError> {
        let digits = normalize_phone_number(phone_number);
        if digits.is_empty() {
            return Ok(None);
        }
        Ok(self
            .find_first(|agent| {
                agent.phone_number.as_deref().map(normalize_phone_number).as_deref()
                    == Some(digits.as_str())
            })
            .await)
    }

    async fn find_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<Agent>, RepositoryError> {
        let wanted = secret_hash.trim().to_ascii_lowercase();
        Ok(self.find_first(|agent| agent.secret_hash == wanted).await)
    }

    async fn create(&self, agent: Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id.0) {
            return Err(RepositoryError::Decode(format!("agent `{}` already exists", agent.id.0)));
        }
        agents.insert(agent.id.0.clone(), agent);
        Ok(())
    }

    async fn claim_call(
        &self,
        id: &AgentId,
        call_sid: &CallSid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&id.0) else {
            return Ok(false);
        };
        if !agent.can_attach(&call_sid.0) {
            let held = agent.active_call_sid.clone().unwrap_or_default();
            if !self.call_ended(&held).await {
                return Ok(false);
            }
        }
        agent.active_call_sid = Some(call_sid.0.clone());
        agent.call_status = AgentCallStatus::Ringing;
        agent.updated_at = now;
        Ok(true)
    }

    async fn apply_call_effect(
        &self,
        id: &AgentId,
        call_sid: &CallSid,
        effect: AgentEffect,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&id.0) else {
            return Ok(false);
        };
        if agent.active_call_sid.as_deref() != Some(call_sid.0.as_str()) {
            return Ok(false);
        }
        match effect {
            AgentEffect::Release(status) => {
                agent.active_call_sid = None;
                agent.call_status = status;
            }
            AgentEffect::Mirror(status) => agent.call_status = status,
            AgentEffect::Unchanged => return Ok(false),
        }
        agent.updated_at = now;
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryCallSessionRepository {
    sessions: RwLock<HashMap<String, CallSession>>,
}

#[async_trait::async_trait]
impl CallSessionRepository for InMemoryCallSessionRepository {
    async fn find_by_sid(&self, call_sid: &CallSid) -> Result<Option<CallSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&call_sid.0).cloned())
    }

    async fn insert_if_absent(&self, session: CallSession) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.call_sid.0) {
            return Ok(false);
        }
        sessions.insert(session.call_sid.0.clone(), session);
        Ok(true)
    }

    async fn apply_status(
        &self,
        update: &StatusUpdate,
    ) -> Result<Option<CallSession>, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&update.call_sid.0) else {
            return Ok(None);
        };
        *session = apply_status_update(session, update);
        Ok(Some(session.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryActivityRepository {
    activity: RwLock<HashMap<String, WebhookActivity>>,
}

#[async_trait::async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn record_webhook(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<WebhookActivity, RepositoryError> {
        let mut activity = self.activity.write().await;
        let entry = activity.entry(agent_id.0.clone()).or_insert_with(|| WebhookActivity {
            agent_id: agent_id.clone(),
            last_received_at: now,
            window_started_at: now,
            count_24h: 0,
        });
        if entry.window_started_at + activity_window() <= now {
            entry.window_started_at = now;
            entry.count_24h = 0;
        }
        entry.count_24h += 1;
        entry.last_received_at = now;
        Ok(entry.clone())
    }

    async fn find(&self, agent_id: &AgentId) -> Result<Option<WebhookActivity>, RepositoryError> {
        let activity = self.activity.read().await;
        Ok(activity.get(&agent_id.0).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCallReportRepository {
    reports: RwLock<Vec<CallReport>>,
}

#[async_trait::async_trait]
impl CallReportRepository for InMemoryCallReportRepository {
    async fn save(&self, report: CallReport) -> Result<(), RepositoryError> {
        let mut reports = self.reports.write().await;
        if !reports.iter().any(|existing| existing.id == report.id) {
            reports.push(report);
        }
        Ok(())
    }

    async fn list_for_agent(&self, agent_id: &AgentId) -> Result<Vec<CallReport>, RepositoryError> {
        let reports = self.reports.read().await;
        Ok(reports.iter().filter(|report| report.agent_id == *agent_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: RwLock<HashMap<(String, String), WindowCount>>,
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn increment(
        &self,
        identifier: &str,
        endpoint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, CoreError> {
        let mut windows = self.windows.write().await;
        let entry = windows
            .entry((identifier.to_string(), endpoint.to_string()))
            .or_insert(WindowCount { count: 0, window_started_at: now });
        if entry.window_started_at + window <= now {
            *entry = WindowCount { count: 0, window_started_at: now };
        }
        entry.count = entry.count.saturating_add(1);
        Ok(*entry)
    }
}
