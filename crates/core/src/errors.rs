use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::redact::redact_sensitive;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("rate limit exceeded ({remaining}/{limit} remaining until {reset_at})")]
    Throttled { limit: u32, remaining: u32, reset_at: DateTime<Utc> },
    #[error("persistence failure: {0}")]
    TransientStore(String),
}

impl CoreError {
    pub fn transient_store(message: impl AsRef<str>) -> Self {
        Self::TransientStore(redact_sensitive(message.as_ref()))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::TooManyRequests { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("too many requests: {message}")]
    TooManyRequests { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "Authentication is required for this resource.",
            Self::NotFound { .. } => "The requested resource was not found.",
            Self::TooManyRequests { .. } => "Too many requests. Please retry after the reset time.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<CoreError> for InterfaceError {
    fn from(value: CoreError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            CoreError::Integrity(message) => Self::Unauthorized { message, correlation_id },
            CoreError::NotFound(message) => Self::NotFound { message, correlation_id },
            CoreError::Validation(message) => Self::BadRequest { message, correlation_id },
            CoreError::Throttled { limit, remaining, reset_at } => Self::TooManyRequests {
                message: format!(
                    "rate limit exceeded ({remaining}/{limit} remaining until {})",
                    reset_at.to_rfc3339()
                ),
                correlation_id,
            },
            CoreError::TransientStore(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            CoreError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
