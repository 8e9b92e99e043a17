pub mod engine;
pub mod status;

pub use engine::{
    apply_status_update, decide_voice, parse_duration, plan_status_update, DeclineReason,
    StatusEvent, StatusUpdate, VoiceDecision, VoiceEvent,
};
pub use status::{agent_effect, translate_provider_status, AgentEffect};
