pub mod answer;
pub mod attempt;
pub mod remote;
pub mod snapshot;
pub mod timer;

pub use answer::{Answer, AnswerEntry};
pub use attempt::{
    Attempt, AttemptId, AttemptStatus, ExamId, OptionId, Question, QuestionId, QuestionKind,
    QuestionOption, ResultId,
};
pub use snapshot::{PersistedSnapshot, SNAPSHOT_VERSION};
pub use timer::{Notice, SessionEvent, SessionOutcome, TimeExpired, TimerTick};
