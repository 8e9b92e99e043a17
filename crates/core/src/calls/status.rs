use crate::domain::agent::AgentCallStatus;
use crate::domain::call::CallStatus;

/// Exhaustive provider vocabulary. Unknown values fall back to `initiated`, the lowest
/// rank, so they can never move a stored session.
pub fn translate_provider_status(raw: &str) -> CallStatus {
    match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "queued" | "initiated" => CallStatus::Initiated,
        "ringing" => CallStatus::Ringing,
        "in-progress" | "answered" => CallStatus::InProgress,
        "completed" => CallStatus::Completed,
        "busy" => CallStatus::Busy,
        "failed" | "canceled" | "cancelled" => CallStatus::Failed,
        "no-answer" => CallStatus::NoAnswer,
        _ => CallStatus::Initiated,
    }
}

/// What a session status means for the agent's active-call projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentEffect {
    /// Clear the active correlation id and mirror the given status.
    Release(AgentCallStatus),
    /// Mirror the status, keeping the correlation id.
    Mirror(AgentCallStatus),
    Unchanged,
}

pub fn agent_effect(status: CallStatus) -> AgentEffect {
    match status {
        CallStatus::Completed => AgentEffect::Release(AgentCallStatus::Completed),
        CallStatus::Failed | CallStatus::Busy | CallStatus::NoAnswer => {
            AgentEffect::Release(AgentCallStatus::Failed)
        }
        CallStatus::InProgress => AgentEffect::Mirror(AgentCallStatus::InProgress),
        CallStatus::Initiated | CallStatus::Ringing => AgentEffect::Unchanged,
    }
}
