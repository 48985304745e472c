use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier issued by the remote authority when an attempt starts.
    AttemptId
);
string_id!(ExamId);
string_id!(QuestionId);
string_id!(OptionId);
string_id!(
    /// Identifier of a graded result, used to route to the result view.
    ResultId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultiChoice,
    FreeText,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    pub points: u32,
}

impl Question {
    /// Boolean questions expose the two implicit options `"true"` and `"false"`.
    pub fn accepts_option(&self, option_id: &OptionId) -> bool {
        match self.kind {
            QuestionKind::Boolean => matches!(option_id.as_str(), "true" | "false"),
            QuestionKind::SingleChoice | QuestionKind::MultiChoice => {
                self.options.iter().any(|option| &option.id == option_id)
            }
            QuestionKind::FreeText => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Active,
    Submitting,
    Submitted,
    Expired,
    Invalidated,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Submitted | AttemptStatus::Invalidated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Active => "active",
            AttemptStatus::Submitting => "submitting",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Expired => "expired",
            AttemptStatus::Invalidated => "invalidated",
        }
    }
}

/// One candidate's instance of taking one exam.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub attempt_id: AttemptId,
    pub exam_id: ExamId,
    pub total_duration_seconds: u32,
    pub questions: Vec<Question>,
    pub started_at: DateTime<Utc>,
    pub status: AttemptStatus,
}

impl Attempt {
    pub fn question(&self, question_id: &QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| &q.id == question_id)
    }
}
