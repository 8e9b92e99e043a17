//! Provider webhooks.
//!
//! - `POST /webhooks/voice[?agent_id=...]` answers a new call with a bridge or a decline
//! - `POST /webhooks/status` merges lifecycle callbacks and always acknowledges with 200
//!
//! Both routes sit behind the signature gate. Only the voice route is throttled; a 429 on
//! the status route would read as a delivery failure and trigger provider retries.

use axum::{
    body::{Body, Bytes},
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use dialgate_core::calls::{StatusEvent, VoiceDecision, VoiceEvent};
use dialgate_core::domain::agent::normalize_phone_number;
use dialgate_core::ratelimit::RateLimitPolicy;
use dialgate_core::signature::{InboundRequest, SIGNATURE_HEADER};

use crate::api::add_rate_limit_headers;
use crate::state::AppState;
use crate::twiml::EMPTY_RESPONSE;

pub const VOICE_PATH: &str = "/webhooks/voice";
pub const STATUS_PATH: &str = "/webhooks/status";

const MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;
const SIGNED_HEADERS: [&str; 5] =
    ["host", "x-forwarded-proto", "x-forwarded-host", "content-type", SIGNATURE_HEADER];

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(VOICE_PATH, post(voice_webhook))
        .route(STATUS_PATH, post(status_webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_signature))
        .with_state(state)
}

/// Buffers the body, checks the provider signature over a borrowed copy, and hands the
/// request on with the same bytes. Fails closed.
async fn require_signature(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(gate) = state.gate.clone() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_WEBHOOK_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(
                event_name = "webhook.signature.body_unreadable",
                path = parts.uri.path(),
                error = %error,
                "webhook body could not be buffered"
            );
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    let verified = {
        let path_and_query = parts.uri.path_and_query().map(|value| value.as_str()).unwrap_or("/");
        let mut inbound = InboundRequest::new(path_and_query, &bytes);
        for name in SIGNED_HEADERS {
            if let Some(value) = parts.headers.get(name).and_then(|value| value.to_str().ok()) {
                inbound = inbound.with_header(name, value);
            }
        }
        gate.verify(&inbound)
    };

    if !verified {
        warn!(
            event_name = "webhook.signature.rejected",
            path = parts.uri.path(),
            "webhook signature verification failed"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceQuery {
    pub agent_id: Option<String>,
}

async fn voice_webhook(
    State(state): State<AppState>,
    Query(query): Query<VoiceQuery>,
    body: Bytes,
) -> Response {
    let params = form_params(&body);
    let Some(event) = VoiceEvent::from_params(&params, query.agent_id.as_deref()) else {
        warn!(event_name = "webhook.voice.malformed", "voice webhook without a call id");
        return render(state.twiml.decline(), StatusCode::OK);
    };
    info!(
        event_name = "webhook.voice.received",
        call_sid = %event.call_sid.0,
        direction = event.direction.as_str(),
        "voice webhook received"
    );

    let dialled = normalize_phone_number(&event.to_number);
    let identifier = if dialled.is_empty() { event.call_sid.0.clone() } else { dialled };
    let decision = state.limiter.check_policy(RateLimitPolicy::WEBHOOK_INGEST, &identifier).await;
    if !decision.allowed {
        warn!(
            event_name = "webhook.voice.throttled",
            call_sid = %event.call_sid.0,
            limit = decision.limit,
            "voice webhook throttled"
        );
        let mut response = render(state.twiml.decline(), StatusCode::TOO_MANY_REQUESTS);
        add_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    match state.orchestrator.handle_voice(&event, Utc::now()).await {
        VoiceDecision::Accept(session) | VoiceDecision::Replay(session) => {
            render(state.twiml.connect(&session), StatusCode::OK)
        }
        VoiceDecision::Decline(_) => render(state.twiml.decline(), StatusCode::OK),
    }
}

async fn status_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let params = form_params(&body);
    match StatusEvent::from_params(&params) {
        Some(event) => {
            state.orchestrator.handle_status(&event, Utc::now()).await;
        }
        None => warn!(event_name = "webhook.status.malformed", "status webhook without a call id"),
    }

    let body = state.twiml.ack().unwrap_or_else(|error| {
        error!(event_name = "webhook.status.render_failed", error = %error, "ack render failed");
        EMPTY_RESPONSE.to_string()
    });
    xml(StatusCode::OK, body)
}

fn form_params(body: &[u8]) -> Vec<(String, String)> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body).unwrap_or_default()
}

fn render(result: Result<String, tera::Error>, status: StatusCode) -> Response {
    match result {
        Ok(body) => xml(status, body),
        Err(error) => {
            error!(event_name = "webhook.voice.render_failed", error = %error, "twiml render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn xml(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/xml; charset=utf-8")], body).into_response()
}
