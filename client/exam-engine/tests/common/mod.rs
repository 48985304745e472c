#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use exam_engine::models::remote::{FetchedAttempt, GradedResult, InProgressStatus, StartedAttempt};
use exam_engine::models::{
    AnswerEntry, AttemptId, ExamId, OptionId, PersistedSnapshot, Question, QuestionId,
    QuestionKind, QuestionOption, ResultId, SNAPSHOT_VERSION,
};
use exam_engine::services::MemoryBackend;
use exam_engine::{
    DurableStore, EngineSettings, Entry, ExamSession, RemoteAuthority, RemoteError,
    SessionEntry,
};

pub const EXAM: &str = "exam-1";
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Canned reply for one remote call.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Conflict(&'static str),
    Invalid,
    NotFound,
    NotAvailable,
    Unreachable,
}

impl Reply {
    fn into_error(self) -> Option<RemoteError> {
        match self {
            Reply::Ok => None,
            Reply::Conflict(result_id) => Some(RemoteError::Conflict {
                result_id: ResultId::from(result_id),
            }),
            Reply::Invalid => Some(RemoteError::Invalid("attempt window closed".into())),
            Reply::NotFound => Some(RemoteError::NotFound),
            Reply::NotAvailable => Some(RemoteError::NotAvailable),
            Reply::Unreachable => Some(RemoteError::Unreachable("connection refused".into())),
        }
    }
}

/// In-memory attempt authority with scripted answers and call counters.
pub struct FakeRemote {
    pub duration_seconds: u32,
    pub remote_remaining: Mutex<u32>,
    pub start_reply: Mutex<Reply>,
    pub fetch_reply: Mutex<Reply>,
    pub in_progress: Mutex<Result<InProgressStatus, Reply>>,
    /// Consumed one per submit call; `Ok` once empty.
    pub submit_script: Mutex<VecDeque<Reply>>,
    pub submit_delay: Mutex<Duration>,
    pub start_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub submitted: Mutex<Vec<Vec<AnswerEntry>>>,
}

impl FakeRemote {
    pub fn new(duration_seconds: u32) -> Arc<Self> {
        Arc::new(Self {
            duration_seconds,
            remote_remaining: Mutex::new(duration_seconds),
            start_reply: Mutex::new(Reply::Ok),
            fetch_reply: Mutex::new(Reply::Ok),
            in_progress: Mutex::new(Ok(InProgressStatus::default())),
            submit_script: Mutex::new(VecDeque::new()),
            submit_delay: Mutex::new(Duration::ZERO),
            start_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn script_submit(&self, replies: impl IntoIterator<Item = Reply>) {
        self.submit_script.lock().unwrap().extend(replies);
    }

    pub fn set_fetch(&self, reply: Reply) {
        *self.fetch_reply.lock().unwrap() = reply;
    }

    pub fn set_start(&self, reply: Reply) {
        *self.start_reply.lock().unwrap() = reply;
    }

    pub fn set_in_progress(&self, status: Result<InProgressStatus, Reply>) {
        *self.in_progress.lock().unwrap() = status;
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn last_submission(&self) -> Option<Vec<AnswerEntry>> {
        self.submitted.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl RemoteAuthority for FakeRemote {
    async fn start_attempt(&self, _exam_id: &ExamId) -> Result<StartedAttempt, RemoteError> {
        let n = self.start_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = self.start_reply.lock().unwrap().clone().into_error() {
            return Err(e);
        }
        Ok(StartedAttempt {
            attempt_id: AttemptId::new(format!("attempt-{}", n)),
            questions: questions(),
            duration_seconds: self.duration_seconds,
            started_at: Some(Utc::now()),
        })
    }

    async fn check_in_progress(&self, _exam_id: &ExamId) -> Result<InProgressStatus, RemoteError> {
        match self.in_progress.lock().unwrap().clone() {
            Ok(status) => Ok(status),
            Err(reply) => Err(reply
                .into_error()
                .unwrap_or(RemoteError::Unreachable("scripted".into()))),
        }
    }

    async fn fetch_attempt(&self, _attempt_id: &AttemptId) -> Result<FetchedAttempt, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.fetch_reply.lock().unwrap().clone().into_error() {
            return Err(e);
        }
        Ok(FetchedAttempt {
            questions: questions(),
            remaining_seconds: *self.remote_remaining.lock().unwrap(),
            duration_seconds: Some(self.duration_seconds),
            started_at: None,
            answers: Vec::new(),
        })
    }

    async fn submit_attempt(
        &self,
        attempt_id: &AttemptId,
        answers: Vec<AnswerEntry>,
    ) -> Result<ResultId, RemoteError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(answers);

        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .submit_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Ok);
        match reply.into_error() {
            Some(e) => Err(e),
            None => Ok(ResultId::new(format!("result-{}", attempt_id))),
        }
    }

    async fn fetch_result(&self, result_id: &ResultId) -> Result<GradedResult, RemoteError> {
        Ok(GradedResult {
            result_id: result_id.clone(),
            attempt_id: AttemptId::from("attempt-1"),
            score: 3.0,
            max_score: 4.0,
            passed: Some(true),
            details: serde_json::Value::Null,
        })
    }
}

pub fn questions() -> Vec<Question> {
    let options = |ids: &[&str]| {
        ids.iter()
            .map(|id| QuestionOption {
                id: OptionId::from(*id),
                label: id.to_uppercase(),
            })
            .collect::<Vec<_>>()
    };

    vec![
        Question {
            id: QuestionId::from("q1"),
            kind: QuestionKind::SingleChoice,
            options: options(&["a", "b", "c"]),
            points: 1,
        },
        Question {
            id: QuestionId::from("q2"),
            kind: QuestionKind::MultiChoice,
            options: options(&["x", "y", "z"]),
            points: 2,
        },
        Question {
            id: QuestionId::from("q3"),
            kind: QuestionKind::FreeText,
            options: Vec::new(),
            points: 3,
        },
        Question {
            id: QuestionId::from("q4"),
            kind: QuestionKind::Boolean,
            options: Vec::new(),
            points: 1,
        },
    ]
}

/// Engine timings for tests: the interval autosave is pushed out of the way.
pub fn settings() -> EngineSettings {
    EngineSettings {
        autosave_interval: Duration::from_secs(3600),
        ..EngineSettings::default()
    }
}

pub fn memory_store() -> (DurableStore, MemoryBackend) {
    let backend = MemoryBackend::new();
    let store = DurableStore::new(Arc::new(backend.clone()), DAY);
    (store, backend)
}

/// Snapshot of `attempt_id` as if it had been written `age` ago.
pub fn snapshot_saved_ago(
    attempt_id: &str,
    remaining_seconds: u32,
    age: ChronoDuration,
    answers: Vec<AnswerEntry>,
) -> PersistedSnapshot {
    let saved_at = Utc::now() - age;
    PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        attempt_id: AttemptId::from(attempt_id),
        exam_id: ExamId::from(EXAM),
        total_duration_seconds: 1800,
        questions: questions(),
        current_question_index: 1,
        answers,
        remaining_seconds,
        started_at: saved_at - ChronoDuration::seconds(i64::from(1800 - remaining_seconds)),
        saved_at,
    }
}

pub async fn enter(
    entry: SessionEntry,
    remote: &Arc<FakeRemote>,
    store: &DurableStore,
    settings: EngineSettings,
) -> Entry {
    init_tracing();
    let remote: Arc<dyn RemoteAuthority> = remote.clone();
    ExamSession::enter(entry, remote, store.clone(), settings)
        .await
        .expect("enter should succeed")
}

/// Enters the exam and insists on a running session.
pub async fn start_session(
    remote: &Arc<FakeRemote>,
    store: &DurableStore,
    settings: EngineSettings,
) -> ExamSession {
    match enter(SessionEntry::exam(EXAM), remote, store, settings).await {
        Entry::Exam(session) => session,
        Entry::Result(outcome) => panic!("expected a running exam, got {:?}", outcome),
    }
}

/// Lets spawned tasks run without moving the paused clock far.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
