use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Voice platform reached through the automation-workflow relay.
    Managed,
    /// Telephony provider delivering signed voice/status webhooks directly.
    Twilio,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::Twilio => "twilio",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "managed" => Some(Self::Managed),
            "twilio" => Some(Self::Twilio),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowHosting {
    Managed,
    SelfHosted,
}

impl WorkflowHosting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::SelfHosted => "self_hosted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "managed" => Some(Self::Managed),
            "self_hosted" | "selfhosted" => Some(Self::SelfHosted),
            _ => None,
        }
    }
}

/// Dashboard-facing projection of the agent's current call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentCallStatus {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "ringing")]
    Ringing,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl AgentCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ringing" => Self::Ringing,
            "in-progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Idle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub user_id: String,
    pub name: String,
    pub provider: ProviderType,
    pub hosting: WorkflowHosting,
    pub phone_number: Option<String>,
    /// SHA-256 hex digest of the shared secret; the plaintext is never stored.
    #[serde(skip_serializing)]
    pub secret_hash: String,
    /// Vault payload of the secret, kept only where outbound use needs the plaintext back.
    #[serde(skip_serializing)]
    pub secret_ciphertext: Option<String>,
    pub call_status: AgentCallStatus,
    pub active_call_sid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_on_call(&self) -> bool {
        self.active_call_sid.is_some()
    }

    /// A call may attach only when no other correlation id is open on this agent.
    pub fn can_attach(&self, call_sid: &str) -> bool {
        match self.active_call_sid.as_deref() {
            None => true,
            Some(active) => active == call_sid,
        }
    }
}

/// Digits-only comparison key so `+1 (415) 555-0100` and `14155550100` resolve alike.
pub fn normalize_phone_number(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
