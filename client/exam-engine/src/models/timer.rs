use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::{AttemptId, ResultId};

/// Events published by a running exam session for the view layer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
    Notice(Notice),
    Routed(SessionOutcome),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimerTick {
    pub attempt_id: AttemptId,
    pub remaining_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeExpired {
    pub attempt_id: AttemptId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notice {
    pub message: String,
    pub transient: bool,
}

/// Where the view should go once the attempt has left `Active` for good.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Submission accepted by this client.
    ViewResult { result_id: ResultId },
    /// The authority had already finalized the attempt elsewhere.
    AlreadyFinalized { result_id: ResultId },
    /// A previous attempt ran out of time while the candidate was away.
    PreviousAttemptExpired { result_id: ResultId },
    /// The attempt window hard-closed; there is no result to show.
    Closed,
}

impl SessionOutcome {
    pub fn result_id(&self) -> Option<&ResultId> {
        match self {
            SessionOutcome::ViewResult { result_id }
            | SessionOutcome::AlreadyFinalized { result_id }
            | SessionOutcome::PreviousAttemptExpired { result_id } => Some(result_id),
            SessionOutcome::Closed => None,
        }
    }
}

impl SessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::TimerTick(_) => "timer-tick",
            SessionEvent::TimeExpired(_) => "time-expired",
            SessionEvent::Notice(_) => "notice",
            SessionEvent::Routed(_) => "routed",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
