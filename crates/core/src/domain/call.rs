use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;

/// Provider-assigned call correlation id; the idempotency key for every event on a call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSid(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    #[serde(rename = "initiated")]
    Initiated,
    #[serde(rename = "ringing")]
    Ringing,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "no-answer")]
    NoAnswer,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
        }
    }

    /// Parses a stored canonical label. Provider vocabulary goes through
    /// [`crate::calls::translate_provider_status`] instead.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initiated" => Some(Self::Initiated),
            "ringing" => Some(Self::Ringing),
            "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "busy" => Some(Self::Busy),
            "failed" => Some(Self::Failed),
            "no-answer" => Some(Self::NoAnswer),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer)
    }

    /// Sessions only ever move to a strictly higher rank; all terminal values share the top rank.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Initiated => 0,
            Self::Ringing => 1,
            Self::InProgress => 2,
            Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    /// Provider directions look like `inbound`, `outbound-api` or `outbound-dial`.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().to_ascii_lowercase().starts_with("outbound") {
            Self::Outbound
        } else {
            Self::Inbound
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    pub call_sid: CallSid,
    pub agent_id: AgentId,
    pub from_number: String,
    pub to_number: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CallSession {
    pub fn initiated(
        call_sid: CallSid,
        agent_id: AgentId,
        from_number: impl Into<String>,
        to_number: impl Into<String>,
        direction: CallDirection,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            call_sid,
            agent_id,
            from_number: from_number.into(),
            to_number: to_number.into(),
            direction,
            status: CallStatus::Initiated,
            started_at: now,
            ended_at: None,
            duration_secs: None,
            recording_url: None,
            recording_sid: None,
            updated_at: now,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status.is_terminal()
    }
}
