//! Drives voice and status events through the pure transition rules and the storage seams.
//!
//! Every persistence error is absorbed here: the telephony paths acknowledge regardless and
//! record the failure in the log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use dialgate_core::calls::{
    agent_effect, decide_voice, plan_status_update, AgentEffect, DeclineReason, StatusEvent,
    VoiceDecision, VoiceEvent,
};
use dialgate_core::domain::agent::Agent;
use dialgate_core::domain::call::{CallSession, CallSid, CallStatus};
use dialgate_core::redact::redact_sensitive;
use dialgate_db::repositories::{AgentRepository, CallSessionRepository, RepositoryError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusOutcome {
    Applied(CallSession),
    /// No session exists for the correlation id.
    Dropped,
    StoreFailed,
}

pub struct CallOrchestrator {
    agents: Arc<dyn AgentRepository>,
    sessions: Arc<dyn CallSessionRepository>,
}

impl CallOrchestrator {
    pub fn new(agents: Arc<dyn AgentRepository>, sessions: Arc<dyn CallSessionRepository>) -> Self {
        Self { agents, sessions }
    }

    pub async fn handle_voice(&self, event: &VoiceEvent, now: DateTime<Utc>) -> VoiceDecision {
        let existing = match self.sessions.find_by_sid(&event.call_sid).await {
            Ok(existing) => existing,
            Err(error) => return store_unavailable(event, "session_lookup", &error),
        };
        if let Some(session) = existing {
            info!(
                event_name = "webhook.voice.replayed",
                call_sid = %event.call_sid.0,
                agent_id = %session.agent_id.0,
                "voice event replayed for existing session"
            );
            return VoiceDecision::Replay(session);
        }

        let agent = match self.resolve_agent(event).await {
            Ok(Some(agent)) => match self.settled_view(agent, event).await {
                Ok(agent) => Some(agent),
                Err(error) => return store_unavailable(event, "held_call_lookup", &error),
            },
            Ok(None) => None,
            Err(error) => return store_unavailable(event, "agent_lookup", &error),
        };

        let session = match decide_voice(event, None, agent.as_ref(), now) {
            VoiceDecision::Accept(session) => session,
            other => {
                log_decline(event, &other);
                return other;
            }
        };

        match self.agents.claim_call(&session.agent_id, &session.call_sid, now).await {
            Ok(true) => {}
            Ok(false) => {
                let active_call_sid = self
                    .agents
                    .find_by_id(&session.agent_id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|agent| agent.active_call_sid)
                    .unwrap_or_default();
                let decision =
                    VoiceDecision::Decline(DeclineReason::AgentBusy { active_call_sid });
                log_decline(event, &decision);
                return decision;
            }
            Err(error) => return store_unavailable(event, "agent_claim", &error),
        }

        match self.sessions.insert_if_absent(session.clone()).await {
            Ok(true) => {
                info!(
                    event_name = "webhook.voice.accepted",
                    call_sid = %session.call_sid.0,
                    agent_id = %session.agent_id.0,
                    "call session created"
                );
                VoiceDecision::Accept(session)
            }
            Ok(false) => match self.sessions.find_by_sid(&session.call_sid).await {
                Ok(Some(existing)) => VoiceDecision::Replay(existing),
                Ok(None) => VoiceDecision::Replay(session),
                Err(error) => store_unavailable(event, "session_reload", &error),
            },
            Err(error) => {
                self.release_claim(&session, now).await;
                store_unavailable(event, "session_insert", &error)
            }
        }
    }

    pub async fn handle_status(&self, event: &StatusEvent, now: DateTime<Utc>) -> StatusOutcome {
        let update = plan_status_update(event, now);

        let session = match self.sessions.apply_status(&update).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                info!(
                    event_name = "call.status.dropped",
                    call_sid = %event.call_sid.0,
                    provider_status = %event.provider_status,
                    "status event for unknown call dropped"
                );
                return StatusOutcome::Dropped;
            }
            Err(error) => {
                warn!(
                    event_name = "call.status.store_failed",
                    call_sid = %event.call_sid.0,
                    error = %redact_sensitive(&error.to_string()),
                    "status event could not be persisted"
                );
                return StatusOutcome::StoreFailed;
            }
        };

        let effect = agent_effect(session.status);
        if effect != AgentEffect::Unchanged {
            if let Err(error) = self
                .agents
                .apply_call_effect(&session.agent_id, &session.call_sid, effect, now)
                .await
            {
                warn!(
                    event_name = "call.agent_projection.store_failed",
                    call_sid = %session.call_sid.0,
                    agent_id = %session.agent_id.0,
                    error = %redact_sensitive(&error.to_string()),
                    "agent call projection could not be updated"
                );
            }
        }

        info!(
            event_name = "call.status.applied",
            call_sid = %session.call_sid.0,
            status = session.status.as_str(),
            "status event applied"
        );
        StatusOutcome::Applied(session)
    }

    /// The explicit selector wins; otherwise the dialled number picks the agent.
    async fn resolve_agent(&self, event: &VoiceEvent) -> Result<Option<Agent>, RepositoryError> {
        match &event.agent_selector {
            Some(agent_id) => self.agents.find_by_id(agent_id).await,
            None => self.agents.find_by_phone_number(&event.to_number).await,
        }
    }

    /// Treats an agent still pointing at a call whose session already ended as free. The claim
    /// re-checks the same condition atomically.
    async fn settled_view(&self, mut agent: Agent, event: &VoiceEvent) -> Result<Agent, RepositoryError> {
        let Some(held) = agent.active_call_sid.clone().filter(|held| *held != event.call_sid.0)
        else {
            return Ok(agent);
        };
        let held_session = self.sessions.find_by_sid(&CallSid(held.clone())).await?;
        if held_session.is_some_and(|session| session.status.is_terminal()) {
            info!(
                event_name = "call.agent_projection.stale",
                agent_id = %agent.id.0,
                held_call_sid = %held,
                "agent still points at a finished call"
            );
            agent.active_call_sid = None;
        }
        Ok(agent)
    }

    async fn release_claim(&self, session: &CallSession, now: DateTime<Utc>) {
        let effect = agent_effect(CallStatus::Failed);
        if let Err(error) =
            self.agents.apply_call_effect(&session.agent_id, &session.call_sid, effect, now).await
        {
            warn!(
                event_name = "webhook.voice.release_failed",
                call_sid = %session.call_sid.0,
                error = %redact_sensitive(&error.to_string()),
                "could not release agent after failed session insert"
            );
        }
    }
}

fn store_unavailable(event: &VoiceEvent, stage: &'static str, error: &RepositoryError) -> VoiceDecision {
    warn!(
        event_name = "webhook.voice.store_unavailable",
        call_sid = %event.call_sid.0,
        stage,
        error = %redact_sensitive(&error.to_string()),
        "declining call because the store is unavailable"
    );
    VoiceDecision::Decline(DeclineReason::StoreUnavailable)
}

fn log_decline(event: &VoiceEvent, decision: &VoiceDecision) {
    let VoiceDecision::Decline(reason) = decision else {
        return;
    };
    let reason = match reason {
        DeclineReason::AgentNotFound => "agent_not_found",
        DeclineReason::AgentBusy { .. } => "agent_busy",
        DeclineReason::StoreUnavailable => "store_unavailable",
    };
    info!(
        event_name = "webhook.voice.declined",
        call_sid = %event.call_sid.0,
        reason,
        "voice event declined"
    );
}
