//! Timer state machine.
//!
//! The engine is pure: no threads, no clock reads, no I/O. Every command takes
//! the caller's `now` and stamps it into `updated_at`. The owning context calls
//! `tick()` once per second while it holds leadership.
//!
//! ## State Transitions
//!
//! ```text
//! Idle/Work  --start--> Running/Work  --tick..0--> Idle/Break
//! Idle/Break --start--> Running/Break --tick..0--> Idle/Work
//! ```
//!
//! `pause` returns to Idle keeping the remaining time, `reset` refills the
//! current phase, `skip` ends the current phase early.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::{Phase, TimerState};
use super::settings::Settings;
use crate::events::Event;

/// The per-learner session record shared by every context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub remaining_seconds: u64,
    /// Duration the current phase started with.
    pub total_seconds: u64,
    pub running: bool,
    pub phase: Phase,
    pub cycles_completed: u32,
    pub settings: Settings,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Fresh session: idle, first work phase, full duration.
    pub fn new(settings: Settings, now: DateTime<Utc>) -> Self {
        let total = settings.phase_secs(Phase::Work, 0);
        Self {
            remaining_seconds: total,
            total_seconds: total,
            running: false,
            phase: Phase::Work,
            cycles_completed: 0,
            settings,
            updated_at: now,
        }
    }

    pub fn timer_state(&self) -> TimerState {
        if self.running {
            TimerState::Running
        } else {
            TimerState::Idle
        }
    }

    /// 0.0 .. 1.0 progress within the current phase.
    pub fn progress(&self) -> f64 {
        if self.total_seconds == 0 {
            return 0.0;
        }
        1.0 - (self.remaining_seconds as f64 / self.total_seconds as f64)
    }

    /// Whether the current phase is a long break.
    pub fn is_long_break(&self) -> bool {
        self.phase == Phase::Break && self.settings.is_long_break(self.cycles_completed)
    }

    /// Restore `0 < total` and `remaining <= total` on data from outside.
    pub(crate) fn normalized(mut self) -> Self {
        if self.total_seconds == 0 {
            self.total_seconds = self.settings.phase_secs(self.phase, self.cycles_completed);
        }
        self.remaining_seconds = self.remaining_seconds.min(self.total_seconds);
        self
    }
}

/// Core timer state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEngine {
    state: SessionState,
}

impl TimerEngine {
    pub fn new(settings: Settings, now: DateTime<Utc>) -> Self {
        Self {
            state: SessionState::new(settings, now),
        }
    }

    pub fn from_state(state: SessionState) -> Self {
        Self {
            state: state.normalized(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn remaining_secs(&self) -> u64 {
        self.state.remaining_seconds
    }

    pub fn total_secs(&self) -> u64 {
        self.state.total_seconds
    }

    pub fn cycles_completed(&self) -> u32 {
        self.state.cycles_completed
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Event {
        Event::StateSnapshot {
            state: self.state.timer_state(),
            phase: self.state.phase,
            remaining_secs: self.state.remaining_seconds,
            total_secs: self.state.total_seconds,
            cycles_completed: self.state.cycles_completed,
            progress_pct: (self.state.progress() * 100.0).clamp(0.0, 100.0),
            at: now,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if self.state.running {
            return None;
        }
        self.state.running = true;
        self.state.updated_at = now;
        Some(Event::TimerStarted {
            phase: self.state.phase,
            remaining_secs: self.state.remaining_seconds,
            at: now,
        })
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if !self.state.running {
            return None;
        }
        self.state.running = false;
        self.state.updated_at = now;
        Some(Event::TimerPaused {
            phase: self.state.phase,
            remaining_secs: self.state.remaining_seconds,
            at: now,
        })
    }

    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<Event> {
        self.state.running = false;
        self.state.remaining_seconds = self.state.total_seconds;
        self.state.updated_at = now;
        Some(Event::TimerReset {
            phase: self.state.phase,
            total_secs: self.state.total_seconds,
            at: now,
        })
    }

    /// Advance the countdown by one second.
    ///
    /// Returns `Some(Event::PhaseCompleted)` when the phase ends. The machine
    /// never rests at zero while running: the decrement that would reach zero
    /// performs the completion instead.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if !self.state.running {
            return None;
        }
        if self.state.remaining_seconds <= 1 {
            return Some(self.complete(now));
        }
        self.state.remaining_seconds -= 1;
        self.state.updated_at = now;
        None
    }

    /// End the current phase and load the next one, idle.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Event {
        self.finish_phase(now, false)
    }

    /// End the current phase early.
    ///
    /// Skipping to the phase already active restarts it instead; no cycle is
    /// counted and no completion is reported.
    pub fn skip(&mut self, to: Phase, now: DateTime<Utc>) -> Event {
        if to == self.state.phase {
            self.state.running = false;
            self.state.remaining_seconds = self.state.total_seconds;
            self.state.updated_at = now;
            return Event::TimerReset {
                phase: self.state.phase,
                total_secs: self.state.total_seconds,
                at: now,
            };
        }
        self.finish_phase(now, true)
    }

    /// Replace the settings snapshot.
    ///
    /// While idle the current phase is recomputed from the new durations. While
    /// running, elapsed time is left alone and the new durations apply from the
    /// next phase.
    pub fn apply_settings(&mut self, settings: Settings, now: DateTime<Utc>) -> Event {
        self.state.settings = settings;
        self.state.updated_at = now;
        let recomputed = !self.state.running;
        if recomputed {
            let total = self
                .state
                .settings
                .phase_secs(self.state.phase, self.state.cycles_completed);
            self.state.total_seconds = total;
            self.state.remaining_seconds = total;
        }
        Event::SettingsApplied {
            phase: self.state.phase,
            total_secs: self.state.total_seconds,
            recomputed,
            at: now,
        }
    }

    /// Adopt a state produced elsewhere (remote record, local broadcast).
    pub fn restore(&mut self, state: SessionState) {
        self.state = state.normalized();
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn finish_phase(&mut self, now: DateTime<Utc>, skipped: bool) -> Event {
        let from = self.state.phase;
        if from == Phase::Work {
            self.state.cycles_completed = self.state.cycles_completed.saturating_add(1);
        }
        let to = from.next();
        let total = self.state.settings.phase_secs(to, self.state.cycles_completed);

        self.state.phase = to;
        self.state.running = false;
        self.state.total_seconds = total;
        self.state.remaining_seconds = total;
        self.state.updated_at = now;

        Event::PhaseCompleted {
            from,
            to,
            cycles_completed: self.state.cycles_completed,
            long_break: self.state.is_long_break(),
            skipped,
            at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn short_settings() -> Settings {
        Settings {
            work_minutes: 1,
            short_break_minutes: 1,
            long_break_minutes: 2,
            cycles_until_long_break: 2,
            ..Settings::default()
        }
    }

    #[test]
    fn start_pause_start() {
        let mut engine = TimerEngine::new(Settings::default(), t0());
        assert_eq!(engine.state().timer_state(), TimerState::Idle);

        assert!(engine.start(t0()).is_some());
        assert!(engine.is_running());
        assert!(engine.start(t0()).is_none(), "second start is a no-op");

        engine.tick(t0() + Duration::seconds(1));
        assert!(engine.pause(t0() + Duration::seconds(2)).is_some());
        assert!(!engine.is_running());
        assert_eq!(engine.remaining_secs(), 25 * 60 - 1);
        assert!(engine.pause(t0()).is_none());
    }

    #[test]
    fn tick_ignored_while_idle() {
        let mut engine = TimerEngine::new(Settings::default(), t0());
        assert!(engine.tick(t0()).is_none());
        assert_eq!(engine.remaining_secs(), 25 * 60);
        assert_eq!(engine.state().updated_at, t0());
    }

    #[test]
    fn countdown_completes_exactly_once() {
        let mut engine = TimerEngine::new(short_settings(), t0());
        engine.start(t0());
        let mut completions = 0;
        for i in 1..=60 {
            if let Some(event) = engine.tick(t0() + Duration::seconds(i)) {
                assert!(event.is_completion());
                completions += 1;
            }
            if engine.is_running() {
                assert!(engine.remaining_secs() > 0, "never rests at zero while running");
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(engine.phase(), Phase::Break);
        assert_eq!(engine.cycles_completed(), 1);
        assert!(!engine.is_running());
        assert_eq!(engine.remaining_secs(), 60);
        // Further ticks do nothing until the break is started.
        assert!(engine.tick(t0() + Duration::seconds(61)).is_none());
    }

    #[test]
    fn break_to_work_keeps_cycle_count() {
        let mut engine = TimerEngine::new(short_settings(), t0());
        engine.complete(t0());
        assert_eq!(engine.cycles_completed(), 1);
        let event = engine.complete(t0());
        match event {
            Event::PhaseCompleted {
                from,
                to,
                cycles_completed,
                long_break,
                skipped,
                ..
            } => {
                assert_eq!(from, Phase::Break);
                assert_eq!(to, Phase::Work);
                assert_eq!(cycles_completed, 1);
                assert!(!long_break);
                assert!(!skipped);
            }
            other => panic!("expected PhaseCompleted, got {other:?}"),
        }
        assert_eq!(engine.total_secs(), 60);
    }

    #[test]
    fn long_break_after_configured_cycles() {
        let mut engine = TimerEngine::new(short_settings(), t0());
        engine.complete(t0()); // work 1 -> short break
        assert_eq!(engine.total_secs(), 60);
        engine.complete(t0()); // break -> work
        engine.complete(t0()); // work 2 -> long break
        assert!(engine.state().is_long_break());
        assert_eq!(engine.total_secs(), 120);
    }

    #[test]
    fn reset_refills_current_phase() {
        let mut engine = TimerEngine::new(short_settings(), t0());
        engine.start(t0());
        engine.tick(t0());
        engine.tick(t0());
        engine.reset(t0());
        assert!(!engine.is_running());
        assert_eq!(engine.remaining_secs(), engine.total_secs());
        assert_eq!(engine.phase(), Phase::Work);
    }

    #[test]
    fn skip_counts_work_cycles_only() {
        let mut engine = TimerEngine::new(short_settings(), t0());
        engine.start(t0());
        let event = engine.skip(Phase::Break, t0());
        assert!(matches!(event, Event::PhaseCompleted { skipped: true, .. }));
        assert_eq!(engine.cycles_completed(), 1);
        assert!(!engine.is_running());

        engine.skip(Phase::Work, t0());
        assert_eq!(engine.cycles_completed(), 1);
        assert_eq!(engine.phase(), Phase::Work);
    }

    #[test]
    fn skip_to_current_phase_restarts_it() {
        let mut engine = TimerEngine::new(short_settings(), t0());
        engine.start(t0());
        engine.tick(t0());
        let event = engine.skip(Phase::Work, t0());
        assert!(matches!(event, Event::TimerReset { .. }));
        assert_eq!(engine.cycles_completed(), 0);
        assert_eq!(engine.remaining_secs(), 60);
    }

    #[test]
    fn settings_recompute_only_while_idle() {
        let mut engine = TimerEngine::new(Settings::default(), t0());
        let longer = Settings {
            work_minutes: 50,
            ..Settings::default()
        };
        engine.apply_settings(longer.clone(), t0());
        assert_eq!(engine.total_secs(), 50 * 60);
        assert_eq!(engine.remaining_secs(), 50 * 60);

        engine.start(t0());
        engine.tick(t0());
        let event = engine.apply_settings(Settings::default(), t0());
        assert!(matches!(event, Event::SettingsApplied { recomputed: false, .. }));
        assert_eq!(engine.total_secs(), 50 * 60);
        assert_eq!(engine.remaining_secs(), 50 * 60 - 1);
        assert_eq!(engine.settings().work_minutes, 25);
    }

    #[test]
    fn restore_clamps_remaining() {
        let mut engine = TimerEngine::new(Settings::default(), t0());
        let mut bad = engine.state().clone();
        bad.remaining_seconds = 10_000;
        engine.restore(bad);
        assert_eq!(engine.remaining_secs(), engine.total_secs());
    }

    #[test]
    fn snapshot_reports_progress() {
        let mut engine = TimerEngine::new(short_settings(), t0());
        engine.start(t0());
        for _ in 0..30 {
            engine.tick(t0());
        }
        match engine.snapshot(t0()) {
            Event::StateSnapshot {
                state,
                remaining_secs,
                progress_pct,
                ..
            } => {
                assert_eq!(state, TimerState::Running);
                assert_eq!(remaining_secs, 30);
                assert!((progress_pct - 50.0).abs() < 1e-9);
            }
            other => panic!("expected StateSnapshot, got {other:?}"),
        }
    }

    #[test]
    fn wire_names_match_store_record() {
        let state = SessionState::new(Settings::default(), t0());
        let json = serde_json::to_value(&state).unwrap();
        for key in [
            "remainingSeconds",
            "totalSeconds",
            "running",
            "phase",
            "cyclesCompleted",
            "settings",
            "updatedAt",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
