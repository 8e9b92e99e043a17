pub mod blueprint;
pub mod calls;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ratelimit;
pub mod redact;
pub mod signature;
pub mod vault;

pub use blueprint::{Blueprint, BlueprintRequest, WorkflowConfig};
pub use calls::{
    AgentEffect, DeclineReason, StatusEvent, StatusUpdate, VoiceDecision, VoiceEvent,
};
pub use domain::activity::{Liveness, WebhookActivity};
pub use domain::agent::{Agent, AgentCallStatus, AgentId, ProviderType, WorkflowHosting};
pub use domain::call::{CallDirection, CallSession, CallSid, CallStatus};
pub use domain::report::CallReport;
pub use errors::{CoreError, InterfaceError};
pub use ratelimit::{RateLimitDecision, RateLimitPolicy, RateLimitStore, RateLimiter};
pub use signature::{InboundRequest, WebhookGate};
pub use vault::{SecretVault, VaultError};
