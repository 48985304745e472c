use thiserror::Error;

use crate::models::{AttemptStatus, ExamId, OptionId, QuestionId, ResultId};

/// Failures reported by the remote attempt authority.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The exam window has not opened yet or has already closed.
    #[error("exam is not available")]
    NotAvailable,

    /// The attempt was already finalized; `result_id` points at the existing result.
    #[error("attempt already finalized as result {result_id}")]
    Conflict { result_id: ResultId },

    /// The attempt window hard-closed.
    #[error("attempt is no longer valid: {0}")]
    Invalid(String),

    #[error("not found")]
    NotFound,

    #[error("remote authority unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected response {status}: {body}")]
    Unexpected { status: u16, body: String },
}

impl RemoteError {
    /// Whether repeating the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unreachable(_) => true,
            RemoteError::Unexpected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            RemoteError::Unexpected {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            RemoteError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("answer does not fit question {0}")]
    WrongAnswerKind(QuestionId),

    #[error("option {option_id} is not offered by question {question_id}")]
    UnknownOption {
        question_id: QuestionId,
        option_id: OptionId,
    },
}

/// Errors surfaced to the caller of the exam session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("exam {0} is not available")]
    ExamUnavailable(ExamId),

    #[error("answers can no longer change (status: {})", .0.as_str())]
    NotActive(AttemptStatus),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("question index {index} is out of range ({count} questions)")]
    QuestionOutOfRange { index: usize, count: usize },

    /// Retryable: the candidate keeps the exam and may submit again.
    #[error("submission failed: {0}")]
    SubmissionFailed(RemoteError),

    /// The attempt window closed before the submission was accepted.
    #[error("attempt window closed: {0}")]
    AttemptClosed(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("submission task failed: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::SubmissionFailed(_))
    }
}
