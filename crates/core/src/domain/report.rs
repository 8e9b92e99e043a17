use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calls::parse_duration;
use crate::domain::agent::AgentId;
use crate::errors::CoreError;

/// What the relay workflow posts once a managed call has ended. Lead creation beyond this
/// record happens elsewhere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallReport {
    pub id: String,
    pub agent_id: AgentId,
    pub phone: Option<String>,
    pub summary: Option<String>,
    pub recording_url: Option<String>,
    pub transcript: Option<String>,
    pub sentiment: Option<String>,
    pub structured_data: Option<Value>,
    pub duration_secs: Option<i64>,
    pub received_at: DateTime<Utc>,
}

impl CallReport {
    /// Reads the flat field set the blueprint maps. Every field is optional, but the body
    /// must be a JSON object.
    pub fn from_payload(
        id: impl Into<String>,
        agent_id: AgentId,
        payload: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let Value::Object(fields) = payload else {
            return Err(CoreError::Validation("report body must be a JSON object".to_string()));
        };

        let text = |name: &str| match fields.get(name) {
            Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Some(Value::Number(value)) => Some(value.to_string()),
            _ => None,
        };
        let structured_data = match fields.get("structured_data") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) if raw.trim().is_empty() => None,
            Some(Value::String(raw)) => {
                Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
            }
            Some(other) => Some(other.clone()),
        };

        Ok(Self {
            id: id.into(),
            agent_id,
            phone: text("phone"),
            summary: text("summary"),
            recording_url: text("recording_url"),
            transcript: text("transcript"),
            sentiment: text("sentiment"),
            structured_data,
            duration_secs: text("duration").as_deref().and_then(parse_duration),
            received_at,
        })
    }
}
