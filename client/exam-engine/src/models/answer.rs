use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::attempt::{OptionId, QuestionId, QuestionKind};

/// A candidate's answer to one question. The variant is fixed by the question kind;
/// boolean questions use `SingleChoice` with option ids `"true"` / `"false"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    SingleChoice { option_id: OptionId },
    MultiChoice { option_ids: BTreeSet<OptionId> },
    FreeText { text: String },
}

impl Answer {
    pub fn single(option_id: impl Into<String>) -> Self {
        Answer::SingleChoice {
            option_id: OptionId::new(option_id),
        }
    }

    pub fn multi<I, S>(option_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Answer::MultiChoice {
            option_ids: option_ids.into_iter().map(OptionId::new).collect(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Answer::FreeText { text: text.into() }
    }

    pub fn fits(&self, kind: QuestionKind) -> bool {
        matches!(
            (self, kind),
            (
                Answer::SingleChoice { .. },
                QuestionKind::SingleChoice | QuestionKind::Boolean
            ) | (Answer::MultiChoice { .. }, QuestionKind::MultiChoice)
                | (Answer::FreeText { .. }, QuestionKind::FreeText)
        )
    }
}

/// Wire shape of one answer inside a snapshot or a submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub question_id: QuestionId,
    pub answer: Answer,
}

impl From<(QuestionId, Answer)> for AnswerEntry {
    fn from((question_id, answer): (QuestionId, Answer)) -> Self {
        Self {
            question_id,
            answer,
        }
    }
}
