use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, WorkflowHosting};

pub const WARNING_AFTER_HOURS: i64 = 6;
pub const OFFLINE_AFTER_HOURS: i64 = 24;
pub const ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Per-agent webhook liveness record. Health reporting only, never call state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookActivity {
    pub agent_id: AgentId,
    pub last_received_at: DateTime<Utc>,
    pub window_started_at: DateTime<Utc>,
    pub count_24h: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Online,
    Warning,
    Offline,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Warning => "warning",
            Self::Offline => "offline",
        }
    }
}

pub fn classify_liveness(
    hosting: WorkflowHosting,
    last_received_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Liveness {
    if hosting == WorkflowHosting::Managed {
        return Liveness::Online;
    }

    let Some(last) = last_received_at else {
        return Liveness::Offline;
    };
    let elapsed = now.signed_duration_since(last);
    if elapsed > Duration::hours(OFFLINE_AFTER_HOURS) {
        Liveness::Offline
    } else if elapsed > Duration::hours(WARNING_AFTER_HOURS) {
        Liveness::Warning
    } else {
        Liveness::Online
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{classify_liveness, Liveness};
    use crate::domain::agent::WorkflowHosting;

    #[test]
    fn managed_integrations_are_always_online() {
        let now = Utc::now();

        assert_eq!(classify_liveness(WorkflowHosting::Managed, None, now), Liveness::Online);
        assert_eq!(
            classify_liveness(WorkflowHosting::Managed, Some(now - Duration::days(30)), now),
            Liveness::Online
        );
    }

    #[test]
    fn self_hosted_thresholds_follow_elapsed_time() {
        let now = Utc::now();
        let classify = |ago: Duration| classify_liveness(WorkflowHosting::SelfHosted, Some(now - ago), now);

        assert_eq!(classify(Duration::minutes(5)), Liveness::Online);
        assert_eq!(classify(Duration::hours(6)), Liveness::Online);
        assert_eq!(classify(Duration::hours(7)), Liveness::Warning);
        assert_eq!(classify(Duration::hours(24)), Liveness::Warning);
        assert_eq!(classify(Duration::hours(25)), Liveness::Offline);
        assert_eq!(classify_liveness(WorkflowHosting::SelfHosted, None, now), Liveness::Offline);
    }
}
