use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::config::EngineSettings;
use crate::error::SessionError;
use crate::metrics::SESSIONS_ACTIVE;
use crate::models::{
    Answer, AnswerEntry, Attempt, AttemptId, AttemptStatus, ExamId, Notice, OptionId,
    PersistedSnapshot, Question, QuestionId, SessionEvent, SessionOutcome, SNAPSHOT_VERSION,
};
use crate::services::answer_ledger::AnswerLedger;
use crate::services::autosave::SaveReason;
use crate::services::countdown_timer::CountdownTimer;
use crate::services::recovery::{recover, RecoveryPlan, ResumeSource, SessionEntry, SessionSeed};
use crate::services::remote_authority::RemoteAuthority;
use crate::services::snapshot_store::DurableStore;
use crate::services::submission::{SubmissionGate, SubmitResult, SubmitTrigger};

const EVENT_BUFFER: usize = 64;

/// Mutable state of one attempt. Only touched under `SessionCore::state`, never across an await.
pub(crate) struct SessionState {
    pub(crate) attempt: Attempt,
    pub(crate) ledger: AnswerLedger,
    pub(crate) timer: CountdownTimer,
    pub(crate) current_question_index: usize,
    pub(crate) outcome: Option<SessionOutcome>,
}

#[derive(Default)]
struct Drivers {
    ticker: Option<JoinHandle<()>>,
    autosave: Option<JoinHandle<()>>,
}

pub(crate) struct SessionCore {
    pub(crate) attempt_id: AttemptId,
    pub(crate) exam_id: ExamId,
    pub(crate) remote: Arc<dyn RemoteAuthority>,
    pub(crate) store: DurableStore,
    pub(crate) settings: EngineSettings,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) gate: SubmissionGate,
    /// Serialises snapshot writes against the final delete.
    pub(crate) write_gate: tokio::sync::Mutex<()>,
    pub(crate) autosave_requests: Notify,
    events: broadcast::Sender<SessionEvent>,
    drivers: Mutex<Drivers>,
    left: AtomicBool,
}

impl SessionCore {
    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn status(&self) -> AttemptStatus {
        self.state().attempt.status
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn notice(&self, message: impl Into<String>, transient: bool) {
        self.publish(SessionEvent::Notice(Notice {
            message: message.into(),
            transient,
        }));
    }

    /// Full snapshot of the current state, or `None` once the attempt has left `Active`.
    pub(crate) fn capture_snapshot(&self) -> Option<PersistedSnapshot> {
        let state = self.state();
        if state.attempt.status != AttemptStatus::Active {
            return None;
        }
        Some(PersistedSnapshot {
            version: SNAPSHOT_VERSION,
            attempt_id: state.attempt.attempt_id.clone(),
            exam_id: state.attempt.exam_id.clone(),
            total_duration_seconds: state.attempt.total_duration_seconds,
            questions: state.attempt.questions.clone(),
            current_question_index: state.current_question_index,
            answers: state.ledger.all_answers(),
            remaining_seconds: state.timer.remaining_seconds(),
            started_at: state.attempt.started_at,
            saved_at: Utc::now(),
        })
    }

    /// Starts the timer and the autosave scheduler, unless the view was left.
    pub(crate) fn start_drivers(self: &Arc<Self>) {
        if self.left.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state();
            if state.attempt.status != AttemptStatus::Active {
                return;
            }
            state.timer.start();
        }

        let mut drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        abort_drivers(&mut drivers);
        drivers.ticker = Some(self.spawn_ticker());
        drivers.autosave = Some(self.spawn_autosave());
    }

    /// Stops the timer and the autosave scheduler synchronously.
    pub(crate) fn stop_drivers(&self) {
        self.state().timer.stop();
        let mut drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        abort_drivers(&mut drivers);
    }
}

fn abort_drivers(drivers: &mut Drivers) {
    if let Some(ticker) = drivers.ticker.take() {
        ticker.abort();
    }
    if let Some(autosave) = drivers.autosave.take() {
        autosave.abort();
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        SESSIONS_ACTIVE.dec();
    }
}

/// How the exam view should proceed after entry.
pub enum Entry {
    /// Show the exam; the session is running.
    Exam(ExamSession),
    /// Skip the exam and route straight to a result.
    Result(SessionOutcome),
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entry::Exam(session) => f
                .debug_tuple("Exam")
                .field(&session.attempt_id())
                .finish(),
            Entry::Result(outcome) => f.debug_tuple("Result").field(outcome).finish(),
        }
    }
}

/// A timed exam attempt for one candidate.
///
/// Owns the countdown, the autosave scheduler and the submission guard. Dropping it
/// (or calling [`ExamSession::leave`]) stops the timer and scheduler; a submission
/// already in flight still completes.
pub struct ExamSession {
    core: Arc<SessionCore>,
    resumed_from: ResumeSource,
}

impl ExamSession {
    /// Runs the recovery protocol and returns either a running session or a result route.
    pub async fn enter(
        entry: SessionEntry,
        remote: Arc<dyn RemoteAuthority>,
        store: DurableStore,
        settings: EngineSettings,
    ) -> Result<Entry, SessionError> {
        tracing::info!(
            exam_id = %entry.exam_id,
            attempt_id = ?entry.attempt_id,
            "Entering exam"
        );

        match recover(&entry, remote.as_ref(), &store).await? {
            RecoveryPlan::Finalized { result_id } => {
                Ok(Entry::Result(SessionOutcome::AlreadyFinalized { result_id }))
            }
            RecoveryPlan::PreviousAttemptExpired { result_id } => {
                tracing::info!(exam_id = %entry.exam_id, "Previous attempt expired while away");
                Ok(Entry::Result(SessionOutcome::PreviousAttemptExpired {
                    result_id,
                }))
            }
            RecoveryPlan::Resume { source, seed } => {
                let session = Self::assemble(seed, source, remote, store, settings);
                session.core.start_drivers();
                session.core.persist(SaveReason::Entry).await;
                Ok(Entry::Exam(session))
            }
            RecoveryPlan::ResumeExpired { source, seed } => {
                let session = Self::assemble(seed, source, remote, store, settings);
                tracing::info!(
                    attempt_id = %session.attempt_id(),
                    "Time ran out while away, submitting immediately"
                );
                let submitted = session.core.expire_now().await;
                match submitted {
                    Ok(SubmitResult::Finished(outcome)) => Ok(Entry::Result(outcome)),
                    Ok(SubmitResult::Ignored) => Ok(Entry::Exam(session)),
                    Err(e) if e.is_retryable() => {
                        tracing::warn!("Expired attempt could not be submitted yet: {}", e);
                        Ok(Entry::Exam(session))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn assemble(
        seed: SessionSeed,
        resumed_from: ResumeSource,
        remote: Arc<dyn RemoteAuthority>,
        store: DurableStore,
        settings: EngineSettings,
    ) -> Self {
        let SessionSeed {
            attempt,
            answers,
            remaining_seconds,
            current_question_index,
        } = seed;

        let mut ledger = AnswerLedger::new(&attempt.questions);
        ledger.restore(answers);
        let timer = CountdownTimer::new(remaining_seconds, settings.forced_save_every_ticks);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        SESSIONS_ACTIVE.inc();
        let core = Arc::new(SessionCore {
            attempt_id: attempt.attempt_id.clone(),
            exam_id: attempt.exam_id.clone(),
            remote,
            store,
            settings,
            state: Mutex::new(SessionState {
                attempt,
                ledger,
                timer,
                current_question_index,
                outcome: None,
            }),
            gate: SubmissionGate::new(),
            write_gate: tokio::sync::Mutex::new(()),
            autosave_requests: Notify::new(),
            events,
            drivers: Mutex::new(Drivers::default()),
            left: AtomicBool::new(false),
        });

        Self { core, resumed_from }
    }

    pub fn attempt_id(&self) -> &AttemptId {
        &self.core.attempt_id
    }

    pub fn exam_id(&self) -> &ExamId {
        &self.core.exam_id
    }

    pub fn resumed_from(&self) -> ResumeSource {
        self.resumed_from
    }

    pub fn status(&self) -> AttemptStatus {
        self.core.status()
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.core.state().timer.remaining_seconds()
    }

    pub fn is_timer_running(&self) -> bool {
        self.core.state().timer.is_running()
    }

    pub fn questions(&self) -> Vec<Question> {
        self.core.state().attempt.questions.clone()
    }

    pub fn current_question_index(&self) -> usize {
        self.core.state().current_question_index
    }

    pub fn get_answer(&self, question_id: &QuestionId) -> Option<Answer> {
        self.core.state().ledger.get_answer(question_id).cloned()
    }

    pub fn answered_count(&self) -> usize {
        self.core.state().ledger.answered_count()
    }

    pub fn all_answers(&self) -> Vec<AnswerEntry> {
        self.core.state().ledger.all_answers()
    }

    /// Result route once the attempt is terminal.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.core.state().outcome.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    pub fn set_answer(&self, question_id: QuestionId, answer: Answer) -> Result<(), SessionError> {
        self.mutate(|state| Ok(state.ledger.set_answer(question_id, answer)?))
    }

    pub fn toggle_option(&self, question_id: &QuestionId, option_id: OptionId) -> Result<(), SessionError> {
        self.mutate(|state| Ok(state.ledger.toggle_option(question_id, option_id)?))
    }

    pub fn clear_answer(&self, question_id: &QuestionId) -> Result<(), SessionError> {
        self.mutate(|state| Ok(state.ledger.clear_answer(question_id)?))
    }

    pub fn go_to_question(&self, index: usize) -> Result<(), SessionError> {
        self.mutate(|state| {
            let count = state.attempt.questions.len();
            if index >= count {
                return Err(SessionError::QuestionOutOfRange { index, count });
            }
            state.current_question_index = index;
            Ok(())
        })
    }

    pub fn next_question(&self) -> Result<(), SessionError> {
        let index = self.current_question_index();
        self.go_to_question(index + 1)
    }

    pub fn previous_question(&self) -> Result<(), SessionError> {
        match self.current_question_index().checked_sub(1) {
            Some(index) => self.go_to_question(index),
            None => Err(SessionError::QuestionOutOfRange {
                index: 0,
                count: self.questions().len(),
            }),
        }
    }

    /// Single entry point for state changes made by the view.
    fn mutate<F>(&self, change: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut SessionState) -> Result<(), SessionError>,
    {
        {
            let mut state = self.core.state();
            if state.attempt.status != AttemptStatus::Active {
                return Err(SessionError::NotActive(state.attempt.status));
            }
            change(&mut state)?;
        }
        self.core.request_autosave();
        Ok(())
    }

    /// Writes a snapshot right away, bypassing the scheduler cadence.
    pub async fn save_now(&self) -> bool {
        self.core.persist(SaveReason::Explicit).await
    }

    /// Submits the attempt. Repeated or concurrent calls result in one request.
    ///
    /// The request runs on its own task, so dropping this future does not cancel it.
    pub async fn submit(&self) -> Result<SubmitResult, SessionError> {
        let core = Arc::clone(&self.core);
        tokio::spawn(core.run_submission(SubmitTrigger::User))
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?
    }

    /// Leaves the exam view: timer and scheduler stop now, a last snapshot is written
    /// in the background if the attempt is still active.
    pub fn leave(&self) {
        if self.core.left.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.stop_drivers();
        tracing::info!(attempt_id = %self.core.attempt_id, "Left exam view");

        if self.core.status() == AttemptStatus::Active {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let core = Arc::clone(&self.core);
                runtime.spawn(async move {
                    core.persist(SaveReason::Leave).await;
                });
            }
        }
    }
}

impl Drop for ExamSession {
    fn drop(&mut self) {
        self.leave();
    }
}
