use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::answer::AnswerEntry;
use super::attempt::{AttemptId, Question, ResultId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedAttempt {
    pub attempt_id: AttemptId,
    pub questions: Vec<Question>,
    pub duration_seconds: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InProgressStatus {
    pub has_open_attempt: bool,
    #[serde(default)]
    pub attempt_id: Option<AttemptId>,
    #[serde(default)]
    pub remaining_seconds: Option<u32>,
    #[serde(default)]
    pub previous_attempt_expired: bool,
    #[serde(default)]
    pub finalized_attempt_id: Option<ResultId>,
}

/// Authoritative state of an open attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedAttempt {
    pub questions: Vec<Question>,
    pub remaining_seconds: u32,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<AnswerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAttemptRequest {
    pub answers: Vec<AnswerEntry>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub result_id: ResultId,
}

/// Body the authority sends with a 409.
#[derive(Debug, Clone, Deserialize)]
pub struct ConflictBody {
    pub result_id: ResultId,
}

/// Graded result as returned by the authority; only passed through to the result view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedResult {
    pub result_id: ResultId,
    pub attempt_id: AttemptId,
    pub score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub details: serde_json::Value,
}
