//! Pure transition rules for call sessions.
//!
//! Storage adapters replay these rules in a single conditional statement keyed by the call
//! correlation id; the functions here are the reference the adapters must agree with.

use chrono::{DateTime, Utc};

use crate::calls::status::translate_provider_status;
use crate::domain::agent::{Agent, AgentId};
use crate::domain::call::{CallDirection, CallSession, CallSid, CallStatus};

/// First contact for a call, decoded from the provider's voice webhook form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceEvent {
    pub call_sid: CallSid,
    pub from_number: String,
    pub to_number: String,
    pub direction: CallDirection,
    /// Explicit `agent_id` query selector; wins over number matching when present.
    pub agent_selector: Option<AgentId>,
}

impl VoiceEvent {
    /// Returns `None` when the form carries no call correlation id.
    pub fn from_params(params: &[(String, String)], agent_selector: Option<&str>) -> Option<Self> {
        let call_sid = param(params, "CallSid")?;
        Some(Self {
            call_sid: CallSid(call_sid.to_string()),
            from_number: param(params, "From").unwrap_or_default().to_string(),
            to_number: param(params, "To").unwrap_or_default().to_string(),
            direction: param(params, "Direction").map(CallDirection::parse).unwrap_or(CallDirection::Inbound),
            agent_selector: agent_selector
                .map(str::trim)
                .filter(|selector| !selector.is_empty())
                .map(|selector| AgentId(selector.to_string())),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    pub call_sid: CallSid,
    pub provider_status: String,
    pub duration_raw: Option<String>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
}

impl StatusEvent {
    pub fn from_params(params: &[(String, String)]) -> Option<Self> {
        let call_sid = param(params, "CallSid")?;
        Some(Self {
            call_sid: CallSid(call_sid.to_string()),
            provider_status: param(params, "CallStatus").unwrap_or_default().to_string(),
            duration_raw: param(params, "CallDuration").map(str::to_string),
            recording_url: param(params, "RecordingUrl").map(str::to_string),
            recording_sid: param(params, "RecordingSid").map(str::to_string),
        })
    }
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeclineReason {
    AgentNotFound,
    AgentBusy { active_call_sid: String },
    StoreUnavailable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoiceDecision {
    /// The correlation id already has a session; answer again without mutating anything.
    Replay(CallSession),
    Accept(CallSession),
    Decline(DeclineReason),
}

/// Decides the outcome of a voice event once the existing session and the resolved agent
/// are known. Nothing is persisted for a decline.
pub fn decide_voice(
    event: &VoiceEvent,
    existing: Option<&CallSession>,
    agent: Option<&Agent>,
    now: DateTime<Utc>,
) -> VoiceDecision {
    if let Some(session) = existing {
        return VoiceDecision::Replay(session.clone());
    }
    let Some(agent) = agent else {
        return VoiceDecision::Decline(DeclineReason::AgentNotFound);
    };
    if !agent.can_attach(&event.call_sid.0) {
        return VoiceDecision::Decline(DeclineReason::AgentBusy {
            active_call_sid: agent.active_call_sid.clone().unwrap_or_default(),
        });
    }

    VoiceDecision::Accept(CallSession::initiated(
        event.call_sid.clone(),
        agent.id.clone(),
        event.from_number.clone(),
        event.to_number.clone(),
        event.direction,
        now,
    ))
}

/// A status event translated into canonical terms, ready to be merged into a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub call_sid: CallSid,
    pub status: CallStatus,
    pub duration_secs: Option<i64>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub observed_at: DateTime<Utc>,
}

pub fn plan_status_update(event: &StatusEvent, now: DateTime<Utc>) -> StatusUpdate {
    StatusUpdate {
        call_sid: event.call_sid.clone(),
        status: translate_provider_status(&event.provider_status),
        duration_secs: event.duration_raw.as_deref().and_then(parse_duration),
        recording_url: non_empty(event.recording_url.as_deref()),
        recording_sid: non_empty(event.recording_sid.as_deref()),
        observed_at: now,
    }
}

/// Whole seconds; fractional values truncate and negatives are ignored.
pub fn parse_duration(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return (seconds >= 0).then_some(seconds);
    }
    let seconds = trimmed.parse::<f64>().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then_some(seconds.trunc() as i64)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

/// Merges an update into a session.
///
/// Status only moves to a strictly higher rank, so the first terminal status wins and
/// late transient events are no-ops on status. `ended_at` is stamped once, and only when
/// the session actually transitions to `completed`. Duration and recording references are
/// overwritten whenever the update carries them.
pub fn apply_status_update(session: &CallSession, update: &StatusUpdate) -> CallSession {
    let mut next = session.clone();
    let advances = update.status.rank() > session.status.rank();

    if advances {
        next.status = update.status;
        if update.status == CallStatus::Completed {
            next.ended_at = session.ended_at.or(Some(update.observed_at));
        }
    }
    if let Some(duration) = update.duration_secs {
        next.duration_secs = Some(duration);
    }
    if let Some(url) = &update.recording_url {
        next.recording_url = Some(url.clone());
    }
    if let Some(sid) = &update.recording_sid {
        next.recording_sid = Some(sid.clone());
    }
    if next != *session {
        next.updated_at = update.observed_at;
    }
    next
}
