//! Importable automation-workflow document that relays call results to the ingest endpoint.
//!
//! The document holds exactly two linked nodes: a webhook trigger and an HTTP request node
//! that posts to the ingest URL with the agent secret as a header credential. Node ids are
//! derived from the inputs so identical requests serialize to identical documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::errors::CoreError;
use crate::vault::generate_token;

pub const AGENT_SECRET_HEADER: &str = "x-agent-secret";
pub const TRIGGER_NODE_NAME: &str = "Call Ended Webhook";
pub const RELAY_NODE_NAME: &str = "Send Call Report";
pub const PREVIEW_TOKEN_BYTES: usize = 16;

/// Field name to payload path, resolved against the trigger's `body`.
const DEFAULT_FIELD_PATHS: [(&str, &str); 7] = [
    ("phone", "message.call.customer.number"),
    ("summary", "message.analysis.summary"),
    ("recording_url", "message.recordingUrl"),
    ("transcript", "message.transcript"),
    ("sentiment", "message.analysis.sentiment"),
    ("structured_data", "message.analysis.structuredData"),
    ("duration", "message.durationSeconds"),
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub workflow_name: Option<String>,
    pub webhook_path: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlueprintRequest {
    pub webhook_url: String,
    pub agent_secret: String,
    pub agent_name: String,
    /// Overrides for individual fields. Values are payload paths, or full expressions when
    /// they start with `=`.
    pub field_map: Option<BTreeMap<String, String>>,
    pub workflow: Option<WorkflowConfig>,
}

impl BlueprintRequest {
    pub fn new(
        webhook_url: impl Into<String>,
        agent_secret: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            agent_secret: agent_secret.into(),
            agent_name: agent_name.into(),
            field_map: None,
            workflow: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlueprintNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(rename = "typeVersion")]
    pub type_version: f64,
    pub position: [i32; 2],
    #[serde(rename = "webhookId", default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: String,
    #[serde(rename = "type")]
    pub connection_type: String,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConnections {
    pub main: Vec<Vec<ConnectionTarget>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub nodes: Vec<BlueprintNode>,
    pub connections: BTreeMap<String, NodeConnections>,
    pub settings: BTreeMap<String, String>,
    pub active: bool,
}

impl Blueprint {
    pub fn to_pretty_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(self)
            .map_err(|error| CoreError::Validation(format!("blueprint could not be serialized: {error}")))
    }
}

pub fn generate(request: &BlueprintRequest) -> Result<Blueprint, CoreError> {
    let webhook_url = request.webhook_url.trim();
    if !(webhook_url.starts_with("https://") || webhook_url.starts_with("http://")) {
        return Err(CoreError::Validation("webhook url must be an http(s) url".to_string()));
    }
    if request.agent_secret.trim().is_empty() {
        return Err(CoreError::Validation("agent secret must not be empty".to_string()));
    }
    let agent_name = request.agent_name.trim();
    if agent_name.is_empty() {
        return Err(CoreError::Validation("agent name must not be empty".to_string()));
    }

    let workflow = request.workflow.clone().unwrap_or_default();
    let seed = format!("{agent_name}\n{webhook_url}");
    let webhook_path = workflow
        .webhook_path
        .as_deref()
        .map(|path| path.trim().trim_matches('/'))
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-calls", slug(agent_name)));

    let trigger = BlueprintNode {
        id: stable_id(&seed, "trigger"),
        name: TRIGGER_NODE_NAME.to_string(),
        node_type: "n8n-nodes-base.webhook".to_string(),
        type_version: 2.0,
        position: [240, 300],
        webhook_id: Some(stable_id(&seed, "webhook")),
        parameters: json!({
            "httpMethod": "POST",
            "path": webhook_path,
            "responseMode": "onReceived",
            "options": {},
        }),
    };

    let body_parameters: Vec<Value> = field_expressions(request.field_map.as_ref())
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let relay = BlueprintNode {
        id: stable_id(&seed, "relay"),
        name: RELAY_NODE_NAME.to_string(),
        node_type: "n8n-nodes-base.httpRequest".to_string(),
        type_version: 4.2,
        position: [520, 300],
        webhook_id: None,
        parameters: json!({
            "method": "POST",
            "url": webhook_url,
            "sendHeaders": true,
            "headerParameters": {
                "parameters": [
                    { "name": AGENT_SECRET_HEADER, "value": request.agent_secret },
                ],
            },
            "sendBody": true,
            "contentType": "json",
            "bodyParameters": { "parameters": body_parameters },
            "options": {},
        }),
    };

    let mut connections = BTreeMap::new();
    connections.insert(
        TRIGGER_NODE_NAME.to_string(),
        NodeConnections {
            main: vec![vec![ConnectionTarget {
                node: RELAY_NODE_NAME.to_string(),
                connection_type: "main".to_string(),
                index: 0,
            }]],
        },
    );

    let mut settings = BTreeMap::new();
    settings.insert("executionOrder".to_string(), "v1".to_string());

    Ok(Blueprint {
        name: workflow
            .workflow_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{agent_name} call relay")),
        nodes: vec![trigger, relay],
        connections,
        settings,
        active: workflow.active,
    })
}

/// Preview variant: a fresh one-shot token stands in for the real secret.
pub fn generate_preview(request: &BlueprintRequest) -> Result<(Blueprint, String), CoreError> {
    let token = generate_token(PREVIEW_TOKEN_BYTES);
    let preview = BlueprintRequest { agent_secret: token.clone(), ..request.clone() };
    Ok((generate(&preview)?, token))
}

fn field_expressions(overrides: Option<&BTreeMap<String, String>>) -> Vec<(String, String)> {
    DEFAULT_FIELD_PATHS
        .iter()
        .map(|(field, default_path)| {
            let chosen = overrides
                .and_then(|map| map.get(*field))
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .unwrap_or(*default_path);
            let expression = if chosen.starts_with('=') {
                chosen.to_string()
            } else {
                format!("={{{{ $json.body.{chosen} }}}}")
            };
            (field.to_string(), expression)
        })
        .collect()
}

fn stable_id(seed: &str, role: &str) -> String {
    let digest = Sha256::digest(format!("{seed}\n{role}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

/// Lowercase ascii words joined by `-`; falls back to `agent` when nothing survives.
pub fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        "agent".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn download_filename(agent_name: &str) -> String {
    format!("{}-blueprint.json", slug(agent_name))
}
