use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::services::exam_session::SessionCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReason {
    Entry,
    Interval,
    Mutation,
    TimerTick,
    Explicit,
    Leave,
}

impl SaveReason {
    fn as_str(self) -> &'static str {
        match self {
            SaveReason::Entry => "entry",
            SaveReason::Interval => "interval",
            SaveReason::Mutation => "mutation",
            SaveReason::TimerTick => "timer_tick",
            SaveReason::Explicit => "explicit",
            SaveReason::Leave => "leave",
        }
    }
}

impl SessionCore {
    /// Asks the scheduler for a debounced write. Requests made while one is pending coalesce.
    pub(crate) fn request_autosave(&self) {
        self.autosave_requests.notify_one();
    }

    /// Writes the full snapshot as it is now. Returns false once the attempt has left `Active`,
    /// in which case nothing is written.
    pub(crate) async fn persist(&self, reason: SaveReason) -> bool {
        let _gate = self.write_gate.lock().await;

        let Some(snapshot) = self.capture_snapshot() else {
            tracing::debug!(
                attempt_id = %self.attempt_id,
                reason = reason.as_str(),
                "Skipping snapshot write, attempt is no longer active"
            );
            return false;
        };

        tracing::trace!(attempt_id = %self.attempt_id, reason = reason.as_str(), "Writing snapshot");
        self.store.save(&self.attempt_id, &snapshot).await;
        true
    }

    /// Scheduler task: a fixed wall-clock cadence plus debounced mutation requests.
    pub(crate) fn spawn_autosave(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let period = core.settings.autosave_interval;
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let reason = tokio::select! {
                    _ = interval.tick() => SaveReason::Interval,
                    _ = core.autosave_requests.notified() => {
                        tokio::time::sleep(core.settings.autosave_debounce).await;
                        SaveReason::Mutation
                    }
                };

                if !core.persist(reason).await {
                    tracing::debug!(attempt_id = %core.attempt_id, "Autosave scheduler stopped");
                    break;
                }
            }
        })
    }

    /// Forced write from the timer; runs beside the scheduler instead of waiting for it.
    pub(crate) fn spawn_forced_save(self: &Arc<Self>) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.persist(SaveReason::TimerTick).await;
        });
    }
}
