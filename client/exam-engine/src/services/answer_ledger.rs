use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::LedgerError;
use crate::models::{Answer, AnswerEntry, OptionId, Question, QuestionId, QuestionKind};

/// Current answer per question. Absence means unanswered.
#[derive(Debug, Clone)]
pub struct AnswerLedger {
    questions: HashMap<QuestionId, Question>,
    answers: BTreeMap<QuestionId, Answer>,
}

impl AnswerLedger {
    pub fn new(questions: &[Question]) -> Self {
        Self {
            questions: questions.iter().map(|q| (q.id.clone(), q.clone())).collect(),
            answers: BTreeMap::new(),
        }
    }

    pub fn set_answer(&mut self, question_id: QuestionId, answer: Answer) -> Result<(), LedgerError> {
        self.validate(&question_id, &answer)?;
        self.answers.insert(question_id, answer);
        Ok(())
    }

    pub fn get_answer(&self, question_id: &QuestionId) -> Option<&Answer> {
        self.answers.get(question_id)
    }

    pub fn clear_answer(&mut self, question_id: &QuestionId) -> Result<(), LedgerError> {
        if !self.questions.contains_key(question_id) {
            return Err(LedgerError::UnknownQuestion(question_id.clone()));
        }
        self.answers.remove(question_id);
        Ok(())
    }

    /// Flips one option of a multi-select answer. Emptying the selection unanswers the question.
    pub fn toggle_option(
        &mut self,
        question_id: &QuestionId,
        option_id: OptionId,
    ) -> Result<(), LedgerError> {
        match self.questions.get(question_id).map(|q| q.kind) {
            None => return Err(LedgerError::UnknownQuestion(question_id.clone())),
            Some(QuestionKind::MultiChoice) => {}
            Some(_) => return Err(LedgerError::WrongAnswerKind(question_id.clone())),
        }
        self.check_option(question_id, &option_id)?;

        let mut selected = match self.answers.remove(question_id) {
            Some(Answer::MultiChoice { option_ids }) => option_ids,
            _ => BTreeSet::new(),
        };
        if !selected.remove(&option_id) {
            selected.insert(option_id);
        }
        if !selected.is_empty() {
            self.answers.insert(
                question_id.clone(),
                Answer::MultiChoice {
                    option_ids: selected,
                },
            );
        }
        Ok(())
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    /// Copies of every answer, ordered by question id.
    pub fn all_answers(&self) -> Vec<AnswerEntry> {
        self.answers
            .iter()
            .map(|(id, answer)| AnswerEntry::from((id.clone(), answer.clone())))
            .collect()
    }

    /// Replaces the ledger contents with saved entries. Entries that no longer fit are dropped.
    pub fn restore(&mut self, entries: Vec<AnswerEntry>) {
        self.answers.clear();
        for entry in entries {
            if let Err(e) = self.set_answer(entry.question_id, entry.answer) {
                tracing::warn!("Dropping restored answer: {}", e);
            }
        }
    }

    fn validate(&self, question_id: &QuestionId, answer: &Answer) -> Result<(), LedgerError> {
        let question = self
            .questions
            .get(question_id)
            .ok_or_else(|| LedgerError::UnknownQuestion(question_id.clone()))?;
        if !answer.fits(question.kind) {
            return Err(LedgerError::WrongAnswerKind(question_id.clone()));
        }
        match answer {
            Answer::SingleChoice { option_id } => self.check_option(question_id, option_id),
            Answer::MultiChoice { option_ids } => option_ids
                .iter()
                .try_for_each(|option_id| self.check_option(question_id, option_id)),
            Answer::FreeText { .. } => Ok(()),
        }
    }

    fn check_option(&self, question_id: &QuestionId, option_id: &OptionId) -> Result<(), LedgerError> {
        let offered = self
            .questions
            .get(question_id)
            .is_some_and(|q| q.accepts_option(option_id));
        if offered {
            Ok(())
        } else {
            Err(LedgerError::UnknownOption {
                question_id: question_id.clone(),
                option_id: option_id.clone(),
            })
        }
    }
}
