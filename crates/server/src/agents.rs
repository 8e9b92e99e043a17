//! Authenticated agent endpoints.
//!
//! - `POST /api/agents`                      provisions an agent and returns its secret once
//! - `GET  /api/agents/{id}/blueprint`       downloads the workflow blueprint (`?preview=true` for a preview)
//! - `GET  /api/agents/{id}/n8n-status`      reports relay liveness from webhook activity
//! - `GET  /api/agents/{id}/reports`         lists call reports received through the relay

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use dialgate_core::blueprint::{self, BlueprintRequest};
use dialgate_core::domain::activity::{classify_liveness, ACTIVITY_WINDOW_HOURS};
use dialgate_core::domain::agent::{
    normalize_phone_number, Agent, AgentCallStatus, AgentId, ProviderType, WorkflowHosting,
};
use dialgate_core::domain::report::CallReport;
use dialgate_core::errors::CoreError;
use dialgate_core::ratelimit::RateLimitPolicy;
use dialgate_core::signature::{signing_url, InboundRequest};
use dialgate_core::vault::{generate_token, hash_secret};

use crate::api::{header_str, ApiError, AuthenticatedUser};
use crate::ingest::INGEST_PATH;
use crate::state::AppState;

const AGENT_SECRET_BYTES: usize = 32;

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub provider: Option<ProviderType>,
    pub hosting: Option<WorkflowHosting>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateAgentResponse {
    pub agent: Agent,
    /// Shown exactly once; only the hash and the vault payload are stored.
    pub secret: String,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlueprintQuery {
    #[serde(default)]
    pub preview: bool,
}

#[derive(Debug, Serialize)]
pub struct BlueprintPreview {
    #[serde(rename = "final")]
    pub is_final: bool,
    pub filename: String,
    pub blueprint: Value,
}

#[derive(Debug, Serialize)]
pub struct RelayStatus {
    pub agent_id: String,
    pub hosting: WorkflowHosting,
    pub status: &'static str,
    pub last_webhook_at: Option<String>,
    pub webhooks_24h: u32,
    pub checked_at: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agents", post(create_agent))
        .route("/api/agents/{id}/blueprint", get(agent_blueprint))
        .route("/api/agents/{id}/n8n-status", get(relay_status))
        .route("/api/agents/{id}/reports", get(call_reports))
        .with_state(state)
}

async fn create_agent(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<CreateAgentResponse>), ApiError> {
    let decision =
        state.limiter.check_policy(RateLimitPolicy::AGENT_CREATION, &user.user_id).await;
    if !decision.allowed {
        return Err(ApiError::Throttled(decision));
    }

    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("agent name is required", &user.correlation_id));
    }
    let phone_number = request
        .phone_number
        .as_deref()
        .map(str::trim)
        .filter(|number| !number.is_empty())
        .map(str::to_string);
    if phone_number.as_deref().is_some_and(|number| normalize_phone_number(number).is_empty()) {
        return Err(ApiError::bad_request("phone number has no digits", &user.correlation_id));
    }

    let secret = generate_token(AGENT_SECRET_BYTES);
    let ciphertext = state
        .vault
        .encrypt(&secret)
        .map_err(|error| ApiError::from_core(error.into(), &user.correlation_id))?;

    let now = Utc::now();
    let agent = Agent {
        id: AgentId(Uuid::new_v4().to_string()),
        user_id: user.user_id.clone(),
        name: name.to_string(),
        provider: request.provider.unwrap_or(ProviderType::Twilio),
        hosting: request.hosting.unwrap_or(WorkflowHosting::SelfHosted),
        phone_number,
        secret_hash: hash_secret(&secret),
        secret_ciphertext: Some(ciphertext),
        call_status: AgentCallStatus::Idle,
        active_call_sid: None,
        created_at: now,
        updated_at: now,
    };
    state
        .repositories
        .agents
        .create(agent.clone())
        .await
        .map_err(|error| ApiError::from_core(error.into(), &user.correlation_id))?;

    info!(
        event_name = "api.agent.provisioned",
        correlation_id = %user.correlation_id,
        agent_id = %agent.id.0,
        provider = agent.provider.as_str(),
        "agent provisioned"
    );
    Ok((
        StatusCode::CREATED,
        Json(CreateAgentResponse { webhook_url: ingest_url(&state, &headers), agent, secret }),
    ))
}

async fn agent_blueprint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(agent_id): Path<String>,
    Query(query): Query<BlueprintQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let agent = owned_agent(&state, &user, agent_id).await?;
    let webhook_url = ingest_url(&state, &headers).ok_or_else(|| {
        ApiError::bad_request("public url could not be determined", &user.correlation_id)
    })?;
    let filename = blueprint::download_filename(&agent.name);

    if query.preview {
        let request = BlueprintRequest::new(webhook_url, "", agent.name.clone());
        let (document, _token) = blueprint::generate_preview(&request)
            .map_err(|error| ApiError::from_core(error, &user.correlation_id))?;
        let blueprint = serde_json::to_value(&document).map_err(|error| {
            ApiError::from_core(CoreError::Configuration(error.to_string()), &user.correlation_id)
        })?;
        return Ok(Json(BlueprintPreview { is_final: false, filename, blueprint }).into_response());
    }

    let Some(ciphertext) = agent.secret_ciphertext.as_deref() else {
        return Err(ApiError::bad_request(
            "agent secret cannot be recovered, request a preview instead",
            &user.correlation_id,
        ));
    };
    let secret = state.vault.decrypt(ciphertext).map_err(|vault_error| {
        error!(
            event_name = "api.blueprint.decrypt_failed",
            correlation_id = %user.correlation_id,
            agent_id = %agent.id.0,
            error = %vault_error,
            "stored agent secret could not be decrypted"
        );
        ApiError::internal("agent secret could not be recovered", &user.correlation_id)
    })?;
    let document = blueprint::generate(&BlueprintRequest::new(webhook_url, secret, agent.name.clone()))
        .and_then(|document| document.to_pretty_json())
        .map_err(|error| ApiError::from_core(error, &user.correlation_id))?;

    info!(
        event_name = "api.blueprint.downloaded",
        correlation_id = %user.correlation_id,
        agent_id = %agent.id.0,
        "blueprint downloaded"
    );
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document,
    )
        .into_response())
}

async fn relay_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(agent_id): Path<String>,
) -> Result<Json<RelayStatus>, ApiError> {
    let agent = owned_agent(&state, &user, agent_id).await?;
    let activity = state
        .repositories
        .activity
        .find(&agent.id)
        .await
        .map_err(|error| ApiError::from_core(error.into(), &user.correlation_id))?;

    let now = Utc::now();
    let liveness =
        classify_liveness(agent.hosting, activity.as_ref().map(|entry| entry.last_received_at), now);
    let webhooks_24h = activity
        .as_ref()
        .filter(|entry| entry.window_started_at + Duration::hours(ACTIVITY_WINDOW_HOURS) > now)
        .map(|entry| entry.count_24h)
        .unwrap_or(0);

    Ok(Json(RelayStatus {
        agent_id: agent.id.0,
        hosting: agent.hosting,
        status: liveness.as_str(),
        last_webhook_at: activity.map(|entry| entry.last_received_at.to_rfc3339()),
        webhooks_24h,
        checked_at: now.to_rfc3339(),
    }))
}

async fn call_reports(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<CallReport>>, ApiError> {
    let agent = owned_agent(&state, &user, agent_id).await?;
    let reports = state
        .repositories
        .reports
        .list_for_agent(&agent.id)
        .await
        .map_err(|error| ApiError::from_core(error.into(), &user.correlation_id))?;
    Ok(Json(reports))
}

/// Agents owned by someone else are indistinguishable from missing ones.
async fn owned_agent(
    state: &AppState,
    user: &AuthenticatedUser,
    agent_id: String,
) -> Result<Agent, ApiError> {
    state
        .repositories
        .agents
        .find_by_id(&AgentId(agent_id))
        .await
        .map_err(|error| ApiError::from_core(error.into(), &user.correlation_id))?
        .filter(|agent| agent.user_id == user.user_id)
        .ok_or_else(|| ApiError::not_found("agent not found", &user.correlation_id))
}

/// Public ingest endpoint, from the configured base url or the request's forwarded headers.
fn ingest_url(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let mut request = InboundRequest::new(INGEST_PATH, &[]);
    for name in ["host", "x-forwarded-proto", "x-forwarded-host"] {
        if let Some(value) = header_str(headers, name) {
            request = request.with_header(name, value);
        }
    }
    signing_url(&request, state.public_base_url.as_deref())
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, SocketAddr};

    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tower::ServiceExt;

    use dialgate_core::domain::agent::AgentId;
    use dialgate_core::domain::report::CallReport;
    use dialgate_core::vault::verify_secret;
    use dialgate_db::{connect_with_settings, migrations, DbPool};

    use crate::state::AppState;
    use crate::testing::{body_json, body_text, test_config, API_TOKEN};

    async fn setup() -> (Router, AppState, DbPool) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let state = AppState::from_pool(&test_config(), pool.clone()).expect("state");
        (super::router(state.clone()), state, pool)
    }

    fn authed(method: &str, uri: &str, user: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "app.example.com")
            .header("authorization", format!("Bearer {API_TOKEN}"))
            .header("x-user-id", user)
            .header("content-type", "application/json")
            .body(body)
            .expect("request")
    }

    async fn provision(app: &Router, user: &str, hosting: &str) -> (String, String) {
        let body = json!({ "name": "Front Desk", "hosting": hosting, "phone_number": "+14155550100" });
        let response = app
            .clone()
            .oneshot(authed("POST", "/api/agents", user, Body::from(body.to_string())))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let payload = body_json(response).await;
        let id = payload["agent"]["id"].as_str().expect("agent id").to_string();
        let secret = payload["secret"].as_str().expect("secret").to_string();
        (id, secret)
    }

    #[tokio::test]
    async fn provisioning_stores_only_hash_and_ciphertext() {
        let (app, state, pool) = setup().await;

        let (id, secret) = provision(&app, "user-1", "self_hosted").await;

        assert_eq!(secret.len(), 64);
        let agent = state
            .repositories
            .agents
            .find_by_id(&AgentId(id))
            .await
            .expect("lookup")
            .expect("agent exists");
        assert!(verify_secret(&secret, &agent.secret_hash));
        let ciphertext = agent.secret_ciphertext.expect("ciphertext");
        assert!(!ciphertext.contains(&secret));
        assert_eq!(state.vault.decrypt(&ciphertext).expect("decrypt"), secret);
        pool.close().await;
    }

    #[tokio::test]
    async fn blueprint_download_embeds_the_secret_and_names_the_file() {
        let (app, _, pool) = setup().await;
        let (id, secret) = provision(&app, "user-1", "self_hosted").await;

        let response = app
            .oneshot(authed("GET", &format!("/api/agents/{id}/blueprint"), "user-1", Body::empty()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get("content-disposition")
            .and_then(|value| value.to_str().ok())
            .expect("content disposition")
            .to_string();
        assert_eq!(disposition, "attachment; filename=\"front-desk-blueprint.json\"");
        let body = body_text(response).await;
        assert!(body.contains(&secret));
        assert!(body.contains("https://app.example.com/api/webhooks/ingest"));
        pool.close().await;
    }

    #[tokio::test]
    async fn blueprint_preview_is_marked_non_final_and_hides_the_secret() {
        let (app, _, pool) = setup().await;
        let (id, secret) = provision(&app, "user-1", "self_hosted").await;

        let response = app
            .oneshot(authed(
                "GET",
                &format!("/api/agents/{id}/blueprint?preview=true"),
                "user-1",
                Body::empty(),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["final"], false);
        assert!(!payload["blueprint"].to_string().contains(&secret));
        pool.close().await;
    }

    #[tokio::test]
    async fn other_users_agents_are_not_found() {
        let (app, _, pool) = setup().await;
        let (id, _) = provision(&app, "user-1", "self_hosted").await;

        let response = app
            .oneshot(authed("GET", &format!("/api/agents/{id}/n8n-status"), "user-2", Body::empty()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        pool.close().await;
    }

    #[tokio::test]
    async fn unreadable_ciphertext_fails_the_download_without_leaking_details() {
        let (app, _, pool) = setup().await;
        let (id, _) = provision(&app, "user-1", "self_hosted").await;
        sqlx::query("UPDATE agent SET secret_ciphertext = ?1 WHERE id = ?2")
            .bind("00:11:22")
            .bind(&id)
            .execute(&pool)
            .await
            .expect("corrupt ciphertext");

        let response = app
            .oneshot(authed("GET", &format!("/api/agents/{id}/blueprint"), "user-1", Body::empty()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(!body.contains("00:11:22"));
        assert!(!body.to_lowercase().contains("nonce"));
        pool.close().await;
    }

    #[tokio::test]
    async fn reports_are_listed_for_the_owner_only() {
        let (app, state, pool) = setup().await;
        let (id, _) = provision(&app, "user-1", "managed").await;
        let report = CallReport::from_payload(
            "report-1",
            AgentId(id.clone()),
            &json!({ "phone": "+14155550199", "summary": "Booked a cleaning." }),
            Utc::now(),
        )
        .expect("report");
        state.repositories.reports.save(report).await.expect("save report");

        let owner = app
            .clone()
            .oneshot(authed("GET", &format!("/api/agents/{id}/reports"), "user-1", Body::empty()))
            .await
            .expect("response");
        let stranger = app
            .oneshot(authed("GET", &format!("/api/agents/{id}/reports"), "user-2", Body::empty()))
            .await
            .expect("response");

        assert_eq!(owner.status(), StatusCode::OK);
        let payload = body_json(owner).await;
        assert_eq!(payload.as_array().map(Vec::len), Some(1));
        assert_eq!(payload[0]["summary"], "Booked a cleaning.");
        assert_eq!(stranger.status(), StatusCode::NOT_FOUND);
        pool.close().await;
    }

    #[tokio::test]
    async fn relay_status_follows_webhook_activity() {
        let (app, state, pool) = setup().await;
        let (self_hosted, _) = provision(&app, "user-1", "self_hosted").await;
        let (managed, _) = provision(&app, "user-1", "managed").await;
        state
            .repositories
            .activity
            .record_webhook(&AgentId(self_hosted.clone()), Utc::now() - Duration::hours(7))
            .await
            .expect("record activity");

        let warning = app
            .clone()
            .oneshot(authed(
                "GET",
                &format!("/api/agents/{self_hosted}/n8n-status"),
                "user-1",
                Body::empty(),
            ))
            .await
            .expect("response");
        let online = app
            .oneshot(authed("GET", &format!("/api/agents/{managed}/n8n-status"), "user-1", Body::empty()))
            .await
            .expect("response");

        let warning = body_json(warning).await;
        assert_eq!(warning["status"], "warning");
        assert_eq!(warning["webhooks_24h"], 1);
        assert_eq!(body_json(online).await["status"], "online");
        pool.close().await;
    }

    fn bad_guess(peer: [u8; 4], forwarded_for: &str) -> Request<Body> {
        let mut request = Request::builder()
            .method("GET")
            .uri("/api/agents/any/n8n-status")
            .header("authorization", "Bearer wrong-token-value")
            .header("x-user-id", "user-1")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .expect("request");
        request.extensions_mut().insert(ConnectInfo(SocketAddr::from((peer, 40_000))));
        request
    }

    #[tokio::test]
    async fn bad_credentials_are_throttled_per_peer_even_when_forwarded_for_rotates() {
        let (app, _, pool) = setup().await;

        let mut statuses = Vec::new();
        for hop in 0..20 {
            let request = bad_guess([192, 0, 2, 50], &format!("198.51.100.{hop}"));
            statuses.push(app.clone().oneshot(request).await.expect("response").status());
        }
        let other_peer =
            app.oneshot(bad_guess([192, 0, 2, 51], "198.51.100.0")).await.expect("response");

        assert_eq!(&statuses[..5], &[StatusCode::UNAUTHORIZED; 5]);
        assert!(statuses[5..].iter().all(|status| *status == StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(other_peer.status(), StatusCode::UNAUTHORIZED);
        pool.close().await;
    }

    #[tokio::test]
    async fn trusted_proxy_forwards_the_client_address() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let mut config = test_config();
        config.server.trusted_proxies = vec![IpAddr::from([10, 0, 0, 1])];
        let app = super::router(AppState::from_pool(&config, pool.clone()).expect("state"));

        for _ in 0..5 {
            app.clone().oneshot(bad_guess([10, 0, 0, 1], "203.0.113.9")).await.expect("response");
        }
        let same_client =
            app.clone().oneshot(bad_guess([10, 0, 0, 1], "203.0.113.9")).await.expect("response");
        let next_client =
            app.oneshot(bad_guess([10, 0, 0, 1], "203.0.113.10")).await.expect("response");

        assert_eq!(same_client.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(next_client.status(), StatusCode::UNAUTHORIZED);
        pool.close().await;
    }

    #[tokio::test]
    async fn agent_creation_is_throttled_per_user() {
        let (app, _, pool) = setup().await;
        for _ in 0..10 {
            provision(&app, "user-1", "managed").await;
        }

        let body = json!({ "name": "One Too Many" });
        let response = app
            .oneshot(authed("POST", "/api/agents", "user-1", Body::from(body.to_string())))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        pool.close().await;
    }
}
