//! Shared pieces of the authenticated API surface: JSON error rendering, throttle
//! responses and the bearer-token extractor.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, Extensions, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{error, warn};
use uuid::Uuid;

use dialgate_core::errors::{CoreError, InterfaceError};
use dialgate_core::ratelimit::{RateLimitDecision, RateLimitPolicy};
use dialgate_core::redact::redact_sensitive;

use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct ThrottledBody {
    pub error: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: String,
}

#[derive(Debug)]
pub enum ApiError {
    Interface(InterfaceError),
    Throttled(RateLimitDecision),
}

impl ApiError {
    pub fn from_core(error: CoreError, correlation_id: &str) -> Self {
        Self::Interface(error.into_interface(correlation_id))
    }

    pub fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::Interface(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn unauthorized(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::Interface(InterfaceError::Unauthorized {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn internal(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::Interface(InterfaceError::Internal {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn not_found(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::Interface(InterfaceError::NotFound {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Interface(error) => interface_response(error),
            Self::Throttled(decision) => throttled_response(&decision),
        }
    }
}

fn interface_response(error: InterfaceError) -> Response {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = error.correlation_id(),
            error = %redact_sensitive(&error.to_string()),
            "api request failed"
        );
    }

    let body = match &error {
        InterfaceError::BadRequest { message, .. } => message.clone(),
        _ => error.user_message().to_string(),
    };
    let payload = ErrorBody {
        error: redact_sensitive(&body),
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(payload)).into_response()
}

/// 429 with the rejection metadata in the body and the conventional headers.
pub fn throttled_response(decision: &RateLimitDecision) -> Response {
    let payload = ThrottledBody {
        error: decision.clone().into_error().to_string(),
        limit: decision.limit,
        remaining: decision.remaining,
        reset_at: decision.reset_at.to_rfc3339(),
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response();
    add_rate_limit_headers(response.headers_mut(), decision);
    response
}

pub fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let values = [
        (header::RETRY_AFTER, decision.retry_after_secs(Utc::now()).to_string()),
        (HeaderName::from_static("x-ratelimit-limit"), decision.limit.to_string()),
        (HeaderName::from_static("x-ratelimit-remaining"), decision.remaining.to_string()),
        (HeaderName::from_static("x-ratelimit-reset"), decision.reset_at.timestamp().to_string()),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

pub fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

/// Address the per-client throttles key on.
///
/// Forwarded headers are only believed when the socket peer is a trusted proxy. In that case
/// the nearest `x-forwarded-for` hop that is not itself a trusted proxy wins, then `x-real-ip`,
/// then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = peer else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
        .collect::<Vec<_>>();
    if let Some(hop) = forwarded.iter().rev().find(|hop| !trusted_proxies.contains(hop)) {
        return hop.to_string();
    }

    header_str(headers, "x-real-ip")
        .and_then(|value| value.parse::<IpAddr>().ok())
        .unwrap_or(peer)
        .to_string()
}

/// Socket peer recorded by `into_make_service_with_connect_info`.
pub fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions.get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(address)| address.ip())
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Caller of the authenticated API, already past the general API throttle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub correlation_id: String,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id();
        let token = header_str(&parts.headers, header::AUTHORIZATION.as_str())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();
        let token_matches: bool =
            token.as_bytes().ct_eq(state.api_token.expose_secret().as_bytes()).into();
        let user_id = header_str(&parts.headers, USER_ID_HEADER);

        let Some(user_id) = user_id.filter(|_| token_matches && !token.is_empty()) else {
            let ip = client_ip(&parts.headers, peer_ip(&parts.extensions), &state.trusted_proxies);
            let decision = state.limiter.check_policy(RateLimitPolicy::AUTH, &ip).await;
            warn!(
                event_name = "api.auth.rejected",
                correlation_id = %correlation_id,
                client_ip = %ip,
                attempts = decision.count,
                "api authentication failed"
            );
            if !decision.allowed {
                return Err(ApiError::Throttled(decision));
            }
            return Err(ApiError::unauthorized("missing or invalid credentials", &correlation_id));
        };

        let decision = state.limiter.check_policy(RateLimitPolicy::API, user_id).await;
        if !decision.allowed {
            return Err(ApiError::Throttled(decision));
        }

        Ok(Self { user_id: user_id.to_string(), correlation_id })
    }
}
