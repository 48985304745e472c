use chrono::{Duration as ChronoDuration, Utc};

use crate::error::{RemoteError, SessionError};
use crate::metrics::record_recovery;
use crate::models::remote::{FetchedAttempt, StartedAttempt};
use crate::models::{
    AnswerEntry, Attempt, AttemptId, AttemptStatus, ExamId, PersistedSnapshot, ResultId,
};
use crate::services::remote_authority::RemoteAuthority;
use crate::services::snapshot_store::{DurableStore, SnapshotProbe};

/// What the caller knows when the exam view is entered.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub exam_id: ExamId,
    /// Known from the route on a reload; otherwise the store's active-attempt pointer is used.
    pub attempt_id: Option<AttemptId>,
}

impl SessionEntry {
    pub fn exam(exam_id: impl Into<String>) -> Self {
        Self {
            exam_id: ExamId::new(exam_id),
            attempt_id: None,
        }
    }

    pub fn attempt(exam_id: impl Into<String>, attempt_id: impl Into<String>) -> Self {
        Self {
            exam_id: ExamId::new(exam_id),
            attempt_id: Some(AttemptId::new(attempt_id)),
        }
    }
}

/// Each step of the entry algorithm, from local store to remote authority.
#[derive(Debug, Clone)]
pub enum RecoveryProbe {
    NoSnapshot,
    StaleSnapshot,
    ValidSnapshot(PersistedSnapshot),
    RemoteOpen {
        attempt_id: AttemptId,
        fetched: FetchedAttempt,
    },
    RemoteFinalized {
        result_id: ResultId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    /// Adopted from the local snapshot; `verified` is false when the authority was unreachable.
    LocalSnapshot { verified: bool },
    RemoteOpen,
    FreshStart,
}

impl ResumeSource {
    fn metric_label(self) -> &'static str {
        match self {
            ResumeSource::LocalSnapshot { verified: true } => "local_snapshot",
            ResumeSource::LocalSnapshot { verified: false } => "local_snapshot_unverified",
            ResumeSource::RemoteOpen => "remote_open",
            ResumeSource::FreshStart => "fresh_start",
        }
    }
}

/// Everything needed to wire up a running session.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub attempt: Attempt,
    pub answers: Vec<AnswerEntry>,
    pub remaining_seconds: u32,
    pub current_question_index: usize,
}

#[derive(Debug, Clone)]
pub enum RecoveryPlan {
    Resume {
        source: ResumeSource,
        seed: SessionSeed,
    },
    /// Time ran out while the candidate was away: submit without showing the exam.
    ResumeExpired {
        source: ResumeSource,
        seed: SessionSeed,
    },
    Finalized {
        result_id: ResultId,
    },
    PreviousAttemptExpired {
        result_id: ResultId,
    },
}

enum RemoteLookup {
    Found(RecoveryProbe),
    PreviousExpired(ResultId),
    Nothing,
}

/// Decides how an exam view starts: resume locally, resume remotely, route to a result,
/// or start a new attempt. The authority's "already finalized" always beats local state.
pub async fn recover(
    entry: &SessionEntry,
    remote: &dyn RemoteAuthority,
    store: &DurableStore,
) -> Result<RecoveryPlan, SessionError> {
    let mut probe = probe_local(entry, store).await;

    loop {
        probe = match probe {
            RecoveryProbe::ValidSnapshot(snapshot) => {
                match remote.fetch_attempt(&snapshot.attempt_id).await {
                    Ok(_) => return Ok(plan_from_snapshot(snapshot, true)),
                    Err(RemoteError::Conflict { result_id }) => {
                        tracing::info!(
                            attempt_id = %snapshot.attempt_id,
                            result_id = %result_id,
                            "Attempt was finalized elsewhere, discarding local snapshot"
                        );
                        store.clear(&snapshot.attempt_id, &snapshot.exam_id).await;
                        RecoveryProbe::RemoteFinalized { result_id }
                    }
                    Err(e @ (RemoteError::Invalid(_) | RemoteError::NotFound)) => {
                        tracing::warn!(
                            attempt_id = %snapshot.attempt_id,
                            "Authority no longer knows this attempt ({}), discarding snapshot",
                            e
                        );
                        store.clear(&snapshot.attempt_id, &snapshot.exam_id).await;
                        RecoveryProbe::NoSnapshot
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt_id = %snapshot.attempt_id,
                            "Could not verify attempt ({}), resuming from local snapshot",
                            e
                        );
                        return Ok(plan_from_snapshot(snapshot, false));
                    }
                }
            }
            RecoveryProbe::NoSnapshot | RecoveryProbe::StaleSnapshot => {
                match lookup_remote(&entry.exam_id, remote).await {
                    RemoteLookup::Found(found) => found,
                    RemoteLookup::PreviousExpired(result_id) => {
                        record_recovery("previous_expired");
                        return Ok(RecoveryPlan::PreviousAttemptExpired { result_id });
                    }
                    RemoteLookup::Nothing => return start_fresh(&entry.exam_id, remote).await,
                }
            }
            RecoveryProbe::RemoteOpen {
                attempt_id,
                fetched,
            } => return Ok(plan_from_remote(&entry.exam_id, attempt_id, fetched)),
            RecoveryProbe::RemoteFinalized { result_id } => {
                record_recovery("finalized");
                return Ok(RecoveryPlan::Finalized { result_id });
            }
        };
    }
}

async fn probe_local(entry: &SessionEntry, store: &DurableStore) -> RecoveryProbe {
    let attempt_id = match &entry.attempt_id {
        Some(attempt_id) => Some(attempt_id.clone()),
        None => store.active_attempt(&entry.exam_id).await,
    };
    let Some(attempt_id) = attempt_id else {
        return RecoveryProbe::NoSnapshot;
    };

    match store.probe(&attempt_id).await {
        SnapshotProbe::ValidSnapshot(snapshot) if snapshot.exam_id != entry.exam_id => {
            tracing::warn!(
                attempt_id = %attempt_id,
                "Snapshot belongs to exam {}, ignoring it",
                snapshot.exam_id
            );
            RecoveryProbe::NoSnapshot
        }
        SnapshotProbe::ValidSnapshot(snapshot) => RecoveryProbe::ValidSnapshot(snapshot),
        SnapshotProbe::StaleSnapshot => RecoveryProbe::StaleSnapshot,
        SnapshotProbe::NoSnapshot => RecoveryProbe::NoSnapshot,
    }
}

async fn lookup_remote(exam_id: &ExamId, remote: &dyn RemoteAuthority) -> RemoteLookup {
    let status = match remote.check_in_progress(exam_id).await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(exam_id = %exam_id, "In-progress lookup failed: {}", e);
            return RemoteLookup::Nothing;
        }
    };

    if status.has_open_attempt {
        if let Some(attempt_id) = status.attempt_id {
            return match remote.fetch_attempt(&attempt_id).await {
                Ok(fetched) => RemoteLookup::Found(RecoveryProbe::RemoteOpen {
                    attempt_id,
                    fetched,
                }),
                Err(RemoteError::Conflict { result_id }) => {
                    RemoteLookup::Found(RecoveryProbe::RemoteFinalized { result_id })
                }
                Err(e) => {
                    tracing::warn!(
                        attempt_id = %attempt_id,
                        "Open attempt could not be fetched: {}",
                        e
                    );
                    RemoteLookup::Nothing
                }
            };
        }
        tracing::warn!(exam_id = %exam_id, "Authority reported an open attempt without an id");
    }

    if status.previous_attempt_expired {
        if let Some(result_id) = status.finalized_attempt_id {
            return RemoteLookup::PreviousExpired(result_id);
        }
    }

    RemoteLookup::Nothing
}

async fn start_fresh(
    exam_id: &ExamId,
    remote: &dyn RemoteAuthority,
) -> Result<RecoveryPlan, SessionError> {
    let started: StartedAttempt = match remote.start_attempt(exam_id).await {
        Ok(started) => started,
        Err(RemoteError::NotAvailable) => {
            return Err(SessionError::ExamUnavailable(exam_id.clone()));
        }
        Err(RemoteError::Conflict { result_id }) => {
            record_recovery("finalized");
            return Ok(RecoveryPlan::Finalized { result_id });
        }
        Err(e) => return Err(SessionError::Remote(e)),
    };

    tracing::info!(
        exam_id = %exam_id,
        attempt_id = %started.attempt_id,
        questions = started.questions.len(),
        duration_seconds = started.duration_seconds,
        "Started new attempt"
    );

    let seed = SessionSeed {
        attempt: Attempt {
            attempt_id: started.attempt_id,
            exam_id: exam_id.clone(),
            total_duration_seconds: started.duration_seconds,
            questions: started.questions,
            started_at: started.started_at.unwrap_or_else(Utc::now),
            status: AttemptStatus::Active,
        },
        answers: Vec::new(),
        remaining_seconds: started.duration_seconds,
        current_question_index: 0,
    };
    Ok(resume_or_expire(ResumeSource::FreshStart, seed))
}

fn plan_from_snapshot(snapshot: PersistedSnapshot, verified: bool) -> RecoveryPlan {
    let remaining_seconds = snapshot.remaining_at(Utc::now());
    let current_question_index = snapshot
        .current_question_index
        .min(snapshot.questions.len().saturating_sub(1));

    tracing::info!(
        attempt_id = %snapshot.attempt_id,
        saved_remaining = snapshot.remaining_seconds,
        remaining_seconds,
        verified,
        "Resuming from local snapshot"
    );

    let seed = SessionSeed {
        attempt: Attempt {
            attempt_id: snapshot.attempt_id,
            exam_id: snapshot.exam_id,
            total_duration_seconds: snapshot.total_duration_seconds,
            questions: snapshot.questions,
            started_at: snapshot.started_at,
            status: AttemptStatus::Active,
        },
        answers: snapshot.answers,
        remaining_seconds,
        current_question_index,
    };
    resume_or_expire(ResumeSource::LocalSnapshot { verified }, seed)
}

fn plan_from_remote(exam_id: &ExamId, attempt_id: AttemptId, fetched: FetchedAttempt) -> RecoveryPlan {
    let duration = fetched
        .duration_seconds
        .unwrap_or(fetched.remaining_seconds)
        .max(fetched.remaining_seconds);
    let started_at = fetched.started_at.unwrap_or_else(|| {
        Utc::now() - ChronoDuration::seconds(i64::from(duration - fetched.remaining_seconds))
    });

    tracing::info!(
        attempt_id = %attempt_id,
        remaining_seconds = fetched.remaining_seconds,
        "Resuming open attempt from the authority"
    );

    let seed = SessionSeed {
        attempt: Attempt {
            attempt_id,
            exam_id: exam_id.clone(),
            total_duration_seconds: duration,
            questions: fetched.questions,
            started_at,
            status: AttemptStatus::Active,
        },
        answers: fetched.answers,
        remaining_seconds: fetched.remaining_seconds,
        current_question_index: 0,
    };
    resume_or_expire(ResumeSource::RemoteOpen, seed)
}

fn resume_or_expire(source: ResumeSource, seed: SessionSeed) -> RecoveryPlan {
    record_recovery(source.metric_label());
    if seed.remaining_seconds == 0 && source != ResumeSource::FreshStart {
        RecoveryPlan::ResumeExpired { source, seed }
    } else {
        RecoveryPlan::Resume { source, seed }
    }
}
