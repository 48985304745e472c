use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::answer::AnswerEntry;
use super::attempt::{AttemptId, ExamId, Question};

pub const SNAPSHOT_VERSION: u32 = 1;

/// The unit written to and read from the durable local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub version: u32,
    pub attempt_id: AttemptId,
    pub exam_id: ExamId,
    pub total_duration_seconds: u32,
    pub questions: Vec<Question>,
    pub current_question_index: usize,
    pub answers: Vec<AnswerEntry>,
    pub remaining_seconds: u32,
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSnapshot {
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.saved_at > max_age
    }

    /// Remaining time once the wall-clock time since `saved_at` is taken off, floored at 0.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u32 {
        let elapsed = (now - self.saved_at).num_seconds().max(0);
        let remaining = i64::from(self.remaining_seconds) - elapsed;
        remaining.clamp(0, i64::from(self.remaining_seconds)) as u32
    }
}
