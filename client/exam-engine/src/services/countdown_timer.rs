use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::models::{AttemptStatus, SessionEvent, TimerTick};
use crate::services::exam_session::SessionCore;

/// Outcome of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The timer is stopped; nothing changed.
    Idle,
    Ticked { remaining: u32, autosave_due: bool },
    /// Reached zero on this tick. The timer has stopped itself and will not report again.
    Expired,
}

/// One-second countdown over the attempt's remaining time.
///
/// The clock itself is driven from outside (one `tick` per second); this type only
/// owns the arithmetic so it can be exercised without a runtime.
#[derive(Debug, Clone)]
pub struct CountdownTimer {
    remaining_seconds: u32,
    running: bool,
    running_ticks: u64,
    forced_save_every: u32,
}

impl CountdownTimer {
    pub fn new(remaining_seconds: u32, forced_save_every: u32) -> Self {
        Self {
            remaining_seconds,
            running: false,
            running_ticks: 0,
            forced_save_every: forced_save_every.max(1),
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }

        self.running_ticks += 1;
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);

        if self.remaining_seconds == 0 {
            self.running = false;
            return TickOutcome::Expired;
        }

        TickOutcome::Ticked {
            remaining: self.remaining_seconds,
            autosave_due: self.running_ticks % u64::from(self.forced_save_every) == 0,
        }
    }
}

impl SessionCore {
    /// Drives the countdown once per second until it expires or is aborted.
    pub(crate) fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = interval_at(Instant::now() + period, period);

            loop {
                interval.tick().await;

                let outcome = {
                    let mut state = core.state();
                    // A submission that won this tick already owns the status.
                    if state.attempt.status != AttemptStatus::Active {
                        break;
                    }
                    state.timer.tick()
                };

                match outcome {
                    TickOutcome::Idle => break,
                    TickOutcome::Ticked {
                        remaining,
                        autosave_due,
                    } => {
                        core.publish(SessionEvent::TimerTick(TimerTick {
                            attempt_id: core.attempt_id.clone(),
                            remaining_seconds: remaining,
                            timestamp: Utc::now(),
                        }));
                        if autosave_due {
                            core.spawn_forced_save();
                        }
                    }
                    TickOutcome::Expired => {
                        core.publish(SessionEvent::TimerTick(TimerTick {
                            attempt_id: core.attempt_id.clone(),
                            remaining_seconds: 0,
                            timestamp: Utc::now(),
                        }));
                        core.on_timer_expired();
                        break;
                    }
                }
            }
        })
    }
}
