use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{RemoteError, SessionError};
use crate::metrics::record_submission;
use crate::models::{AttemptStatus, SessionEvent, SessionOutcome, TimeExpired};
use crate::services::exam_session::SessionCore;

/// Single-flight flag: at most one submission is in flight per attempt.
#[derive(Debug, Default)]
pub struct SubmissionGate {
    in_flight: AtomicBool,
}

impl SubmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the gate; false if another submission already holds it.
    pub fn try_acquire(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    pub fn is_held(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    User,
    Expiry,
}

impl SubmitTrigger {
    fn as_str(self) -> &'static str {
        match self {
            SubmitTrigger::User => "user",
            SubmitTrigger::Expiry => "expiry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    /// The attempt reached a terminal state; route to the outcome.
    Finished(SessionOutcome),
    /// Another submission is in flight or the attempt is already terminal.
    Ignored,
}

impl SessionCore {
    /// Timer reached zero: `Active -> Expired`, then submit after the grace delay unless
    /// a manual submission got there first.
    pub(crate) fn on_timer_expired(self: &Arc<Self>) {
        {
            let mut state = self.state();
            if state.attempt.status != AttemptStatus::Active {
                return;
            }
            state.attempt.status = AttemptStatus::Expired;
        }
        tracing::info!(attempt_id = %self.attempt_id, "Time expired");
        self.publish(SessionEvent::TimeExpired(TimeExpired {
            attempt_id: self.attempt_id.clone(),
            timestamp: chrono::Utc::now(),
        }));

        let core = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(core.settings.grace_delay).await;

            if core.status() != AttemptStatus::Expired {
                tracing::debug!(
                    attempt_id = %core.attempt_id,
                    "Submission already handled during grace delay"
                );
                return;
            }
            if let Err(e) = Arc::clone(&core).run_submission(SubmitTrigger::Expiry).await {
                tracing::warn!(attempt_id = %core.attempt_id, "Automatic submission failed: {}", e);
            }
        });
    }

    /// Expiry discovered on entry: submit straight away, nothing was shown yet.
    pub(crate) async fn expire_now(self: &Arc<Self>) -> Result<SubmitResult, SessionError> {
        {
            let mut state = self.state();
            if state.attempt.status == AttemptStatus::Active {
                state.attempt.status = AttemptStatus::Expired;
            }
        }
        Arc::clone(self).run_submission(SubmitTrigger::Expiry).await
    }

    pub(crate) async fn run_submission(
        self: Arc<Self>,
        trigger: SubmitTrigger,
    ) -> Result<SubmitResult, SessionError> {
        if !self.gate.try_acquire() {
            tracing::debug!(
                attempt_id = %self.attempt_id,
                trigger = trigger.as_str(),
                "Submission already in flight, ignoring"
            );
            record_submission(trigger.as_str(), "ignored");
            return Ok(SubmitResult::Ignored);
        }

        let answers = {
            let mut state = self.state();
            match state.attempt.status {
                AttemptStatus::Active | AttemptStatus::Expired => {}
                status => {
                    // Terminal: the gate stays closed for good.
                    tracing::debug!(
                        attempt_id = %self.attempt_id,
                        status = status.as_str(),
                        "Attempt already finished, ignoring submission"
                    );
                    record_submission(trigger.as_str(), "ignored");
                    return Ok(SubmitResult::Ignored);
                }
            }
            state.attempt.status = AttemptStatus::Submitting;
            state.timer.stop();
            state.ledger.all_answers()
        };
        self.stop_drivers();

        tracing::info!(
            attempt_id = %self.attempt_id,
            trigger = trigger.as_str(),
            answers = answers.len(),
            "Submitting attempt"
        );

        match self.remote.submit_attempt(&self.attempt_id, answers).await {
            Ok(result_id) => {
                record_submission(trigger.as_str(), "submitted");
                let outcome = SessionOutcome::ViewResult { result_id };
                self.finish(AttemptStatus::Submitted, outcome.clone(), true)
                    .await;
                Ok(SubmitResult::Finished(outcome))
            }
            Err(RemoteError::Conflict { result_id }) => {
                tracing::info!(
                    attempt_id = %self.attempt_id,
                    result_id = %result_id,
                    "Attempt was already submitted, routing to existing result"
                );
                record_submission(trigger.as_str(), "conflict");
                let outcome = SessionOutcome::AlreadyFinalized { result_id };
                self.finish(AttemptStatus::Invalidated, outcome.clone(), true)
                    .await;
                Ok(SubmitResult::Finished(outcome))
            }
            Err(RemoteError::Invalid(reason)) => {
                tracing::warn!(attempt_id = %self.attempt_id, "Attempt window closed: {}", reason);
                record_submission(trigger.as_str(), "closed");
                // Not confirmed: the snapshot stays until recovery sees the attempt rejected.
                self.finish(AttemptStatus::Invalidated, SessionOutcome::Closed, false)
                    .await;
                Err(SessionError::AttemptClosed(reason))
            }
            Err(e) => {
                tracing::warn!(
                    attempt_id = %self.attempt_id,
                    trigger = trigger.as_str(),
                    "Submission failed, candidate may retry: {}",
                    e
                );
                record_submission(trigger.as_str(), "failed");
                self.state().attempt.status = AttemptStatus::Active;
                self.gate.release();
                self.start_drivers();
                self.notice("Submission failed. Your answers are kept, please try again.", true);
                Err(SessionError::SubmissionFailed(e))
            }
        }
    }

    /// Records the terminal status and routes the view. The snapshot is deleted only when the
    /// authority confirmed the attempt as finalized.
    async fn finish(&self, status: AttemptStatus, outcome: SessionOutcome, confirmed: bool) {
        {
            // An in-flight autosave lands before the status turns terminal.
            let _gate = self.write_gate.lock().await;
            if confirmed {
                self.store.clear(&self.attempt_id, &self.exam_id).await;
            }
        }
        {
            let mut state = self.state();
            state.attempt.status = status;
            state.outcome = Some(outcome.clone());
        }
        tracing::info!(
            attempt_id = %self.attempt_id,
            status = status.as_str(),
            "Attempt finalized"
        );
        self.publish(SessionEvent::Routed(outcome));
    }
}
