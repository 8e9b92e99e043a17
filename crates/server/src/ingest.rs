//! Relay ingest endpoint targeted by generated blueprints.

use axum::{
    body::Bytes,
    extract::State,
    http::{Extensions, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use dialgate_core::blueprint::AGENT_SECRET_HEADER;
use dialgate_core::domain::report::CallReport;
use dialgate_core::errors::CoreError;
use dialgate_core::ratelimit::RateLimitPolicy;
use dialgate_core::redact::redact_sensitive;
use dialgate_core::vault::{hash_secret, verify_secret};

use crate::api::{client_ip, correlation_id, header_str, peer_ip, ApiError};
use crate::state::AppState;

pub const INGEST_PATH: &str = "/api/webhooks/ingest";

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub received: bool,
    pub report_id: String,
    pub agent_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new().route(INGEST_PATH, post(ingest_call_report)).with_state(state)
}

async fn ingest_call_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let correlation_id = correlation_id();
    let agent = match header_str(&headers, AGENT_SECRET_HEADER) {
        Some(secret) => state
            .repositories
            .agents
            .find_by_secret_hash(&hash_secret(secret))
            .await
            .map_err(|error| ApiError::from_core(error.into(), &correlation_id))?
            .filter(|agent| verify_secret(secret, &agent.secret_hash)),
        None => None,
    };
    let Some(agent) = agent else {
        let ip = client_ip(&headers, peer_ip(&extensions), &state.trusted_proxies);
        let decision = state.limiter.check_policy(RateLimitPolicy::AUTH, &ip).await;
        warn!(
            event_name = "webhook.ingest.rejected",
            correlation_id = %correlation_id,
            client_ip = %ip,
            attempts = decision.count,
            "ingest webhook secret missing or unknown"
        );
        if !decision.allowed {
            return Err(ApiError::Throttled(decision));
        }
        return Err(ApiError::unauthorized("missing or unknown agent secret", &correlation_id));
    };

    let decision =
        state.limiter.check_policy(RateLimitPolicy::WEBHOOK_INGEST, &agent.secret_hash).await;
    if !decision.allowed {
        warn!(
            event_name = "webhook.ingest.throttled",
            correlation_id = %correlation_id,
            agent_id = %agent.id.0,
            limit = decision.limit,
            "ingest webhook throttled"
        );
        return Err(ApiError::Throttled(decision));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|error| {
        ApiError::from_core(CoreError::Validation(format!("invalid json body: {error}")), &correlation_id)
    })?;

    let now = Utc::now();
    if let Err(error) = state.repositories.activity.record_webhook(&agent.id, now).await {
        warn!(
            event_name = "webhook.ingest.activity_failed",
            correlation_id = %correlation_id,
            agent_id = %agent.id.0,
            error = %redact_sensitive(&error.to_string()),
            "webhook activity could not be recorded"
        );
    }

    let report = CallReport::from_payload(Uuid::new_v4().to_string(), agent.id.clone(), &payload, now)
        .map_err(|error| ApiError::from_core(error, &correlation_id))?;
    let report_id = report.id.clone();
    state
        .repositories
        .reports
        .save(report)
        .await
        .map_err(|error| ApiError::from_core(error.into(), &correlation_id))?;

    info!(
        event_name = "webhook.ingest.stored",
        correlation_id = %correlation_id,
        agent_id = %agent.id.0,
        report_id = %report_id,
        "call report stored"
    );
    Ok((
        StatusCode::OK,
        Json(IngestResponse { received: true, report_id, agent_id: agent.id.0 }),
    ))
}
