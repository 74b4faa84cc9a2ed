use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::ContextId;
use crate::timer::{Phase, TimerState};

/// Every state change in a context produces an Event.
/// The CLI prints them; tests assert on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TimerStarted {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        phase: Phase,
        total_secs: u64,
        at: DateTime<Utc>,
    },
    /// A phase ended, either by the countdown reaching zero or by a skip.
    PhaseCompleted {
        from: Phase,
        to: Phase,
        cycles_completed: u32,
        long_break: bool,
        skipped: bool,
        at: DateTime<Utc>,
    },
    SettingsApplied {
        phase: Phase,
        total_secs: u64,
        /// False when the timer was running and the current phase kept its length.
        recomputed: bool,
        at: DateTime<Utc>,
    },
    /// Follower adopted a newer record from the store or the local channel.
    RemoteApplied {
        phase: Phase,
        running: bool,
        remaining_secs: u64,
        updated_at: DateTime<Utc>,
    },
    LeaderElected {
        context_id: ContextId,
        sequence: u64,
        at: DateTime<Utc>,
    },
    LeaderDemoted {
        context_id: ContextId,
        superseded_by: ContextId,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        state: TimerState,
        phase: Phase,
        remaining_secs: u64,
        total_secs: u64,
        cycles_completed: u32,
        progress_pct: f64,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn is_completion(&self) -> bool {
        matches!(self, Event::PhaseCompleted { .. })
    }
}
