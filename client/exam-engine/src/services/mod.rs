pub mod answer_ledger;
pub mod autosave;
pub mod countdown_timer;
pub mod exam_session;
pub mod recovery;
pub mod remote_authority;
pub mod snapshot_store;
pub mod submission;

pub use answer_ledger::AnswerLedger;
pub use autosave::SaveReason;
pub use countdown_timer::{CountdownTimer, TickOutcome};
pub use exam_session::{Entry, ExamSession};
pub use recovery::{recover, RecoveryPlan, ResumeSource, SessionEntry};
pub use remote_authority::{HttpRemoteAuthority, RemoteAuthority};
pub use snapshot_store::{DurableStore, MemoryBackend, RedisBackend, SnapshotBackend, SnapshotProbe};
pub use submission::{SubmissionGate, SubmitResult, SubmitTrigger};
