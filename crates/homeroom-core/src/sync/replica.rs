//! Bridge between one context and the durable store.
//!
//! Write path (leader only): push the full record on every transition and
//! periodically while running. Read path (every context): records arriving on
//! the change feed are reconciled against the local state.
//!
//! Reconciliation rules, in order:
//!
//! 1. The leader ignores incoming records; it is the source of truth.
//! 2. A record not strictly newer than the last one applied is discarded.
//! 3. A running record replaces everything except the local remaining time,
//!    which is only clamped to the new total. Remote remaining is stale by the
//!    time it arrives.
//! 4. A stopped record is applied whole.
//! 5. Applying starts a guard period during which this context's own pushes
//!    are held back, so an echo cannot immediately overwrite the new state.

use chrono::{DateTime, Duration, Utc};

use super::ids::LearnerId;
use super::store::{ChangeFeed, SessionRecord, SharedStore};
use crate::error::StoreError;
use crate::storage::SyncConfig;
use crate::timer::SessionState;

/// Rejects anything not strictly newer than what was last applied.
#[derive(Debug, Clone, Default)]
pub struct StalenessGuard {
    last_applied: Option<DateTime<Utc>>,
}

impl StalenessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied(&self) -> Option<DateTime<Utc>> {
        self.last_applied
    }

    /// Admit `updated_at` if it is strictly newer, recording it.
    pub fn admit(&mut self, updated_at: DateTime<Utc>) -> bool {
        match self.last_applied {
            Some(last) if updated_at <= last => false,
            _ => {
                self.last_applied = Some(updated_at);
                true
            }
        }
    }

    /// Record a timestamp this context produced itself.
    pub fn mark(&mut self, updated_at: DateTime<Utc>) {
        self.last_applied = Some(self.last_applied.map_or(updated_at, |l| l.max(updated_at)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Held back by the guard period; still pending.
    Suppressed,
    /// Store rejected the write; still pending.
    Failed,
    /// Nothing to push.
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    IgnoredAsLeader,
    Stale,
    /// The state to adopt.
    Applied(SessionState),
}

#[derive(Debug, Clone, Copy)]
struct PushMark {
    remaining_seconds: u64,
    at: DateTime<Utc>,
}

pub struct ReplicaSynchronizer {
    store: SharedStore,
    learner: LearnerId,
    guard: StalenessGuard,
    guard_period: Duration,
    guard_until: Option<DateTime<Utc>>,
    push_interval: Duration,
    min_push_drift_secs: u64,
    pending: Option<SessionState>,
    last_pushed: Option<PushMark>,
}

impl std::fmt::Debug for ReplicaSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaSynchronizer")
            .field("learner", &self.learner)
            .field("last_applied", &self.guard.last_applied())
            .field("guard_until", &self.guard_until)
            .field("pending", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl ReplicaSynchronizer {
    pub fn new(store: SharedStore, learner: LearnerId, config: &SyncConfig) -> Self {
        Self {
            store,
            learner,
            guard: StalenessGuard::new(),
            guard_period: config.guard_period(),
            guard_until: None,
            push_interval: config.push_interval(),
            min_push_drift_secs: config.min_push_drift_secs,
            pending: None,
            last_pushed: None,
        }
    }

    pub fn learner(&self) -> &LearnerId {
        &self.learner
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_applied(&self) -> Option<DateTime<Utc>> {
        self.guard.last_applied()
    }

    pub fn subscribe(&self) -> ChangeFeed {
        self.store.subscribe(&self.learner)
    }

    /// Point query on attach. The returned state is adopted as-is, remaining
    /// time included.
    pub fn hydrate(&mut self) -> Result<Option<SessionState>, StoreError> {
        let record = self.store.fetch(&self.learner)?;
        Ok(record.map(|record| {
            self.guard.mark(record.state.updated_at);
            record.state.normalized()
        }))
    }

    /// Push after a transition that changed phase, running flag or settings.
    pub fn on_transition(&mut self, state: &SessionState, now: DateTime<Utc>) -> PushOutcome {
        self.pending = Some(state.clone());
        self.flush(now)
    }

    /// Periodic check, called by the leader on every poll.
    ///
    /// Retries a pending push with the latest state, or pushes a running
    /// countdown once per push interval if it drifted far enough from the last
    /// pushed value.
    pub fn on_periodic(&mut self, state: &SessionState, now: DateTime<Utc>) -> PushOutcome {
        if self.pending.is_some() {
            self.pending = Some(state.clone());
            return self.flush(now);
        }
        if !state.running {
            return PushOutcome::Idle;
        }
        let due = match self.last_pushed {
            None => true,
            Some(mark) => {
                let drift = mark.remaining_seconds.abs_diff(state.remaining_seconds);
                now - mark.at >= self.push_interval && drift >= self.min_push_drift_secs
            }
        };
        if !due {
            return PushOutcome::Idle;
        }
        self.pending = Some(state.clone());
        self.flush(now)
    }

    /// Try to write the pending state.
    pub fn flush(&mut self, now: DateTime<Utc>) -> PushOutcome {
        let Some(state) = self.pending.as_ref() else {
            return PushOutcome::Idle;
        };
        if self.guard_until.is_some_and(|until| now < until) {
            tracing::debug!(learner = %self.learner, "push held back by guard period");
            return PushOutcome::Suppressed;
        }
        let record = SessionRecord::new(self.learner.clone(), state.clone());
        match self.store.upsert(&record) {
            Ok(()) => {
                // Our own echo must not be applied later.
                self.guard.mark(record.state.updated_at);
                self.last_pushed = Some(PushMark {
                    remaining_seconds: record.state.remaining_seconds,
                    at: now,
                });
                self.pending = None;
                PushOutcome::Pushed
            }
            Err(e) => {
                tracing::warn!(learner = %self.learner, error = %e, "session push failed, will retry");
                PushOutcome::Failed
            }
        }
    }

    /// Drop any pending write, e.g. after losing leadership.
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Decide what to do with a record from the change feed.
    pub fn reconcile(
        &mut self,
        incoming: &SessionRecord,
        local: &SessionState,
        is_leader: bool,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        if is_leader {
            return ReconcileOutcome::IgnoredAsLeader;
        }
        if !self.guard.admit(incoming.state.updated_at) {
            tracing::debug!(
                learner = %self.learner,
                updated_at = %incoming.state.updated_at,
                "discarding stale record"
            );
            return ReconcileOutcome::Stale;
        }

        let mut merged = incoming.state.clone().normalized();
        if merged.running && merged.phase == local.phase {
            merged.remaining_seconds = local.remaining_seconds.min(merged.total_seconds);
        }
        self.pending = None;
        self.guard_until = Some(now + self.guard_period);
        ReconcileOutcome::Applied(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::{MemoryStore, SessionStore};
    use crate::timer::{Phase, Settings};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    fn ada() -> LearnerId {
        LearnerId::new("ada").unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, ReplicaSynchronizer) {
        let store = Arc::new(MemoryStore::new());
        let replica = ReplicaSynchronizer::new(store.clone(), ada(), &SyncConfig::default());
        (store, replica)
    }

    fn state(remaining: u64, running: bool, at: DateTime<Utc>) -> SessionState {
        let mut s = SessionState::new(Settings::default(), at);
        s.remaining_seconds = remaining;
        s.running = running;
        s
    }

    fn record(remaining: u64, running: bool, at: DateTime<Utc>) -> SessionRecord {
        SessionRecord::new(ada(), state(remaining, running, at))
    }

    #[test]
    fn staleness_guard_requires_strictly_newer() {
        let mut guard = StalenessGuard::new();
        assert!(guard.admit(t0()));
        assert!(!guard.admit(t0()));
        assert!(!guard.admit(t0() - secs(1)));
        assert!(guard.admit(t0() + secs(1)));
    }

    #[test]
    fn leader_ignores_records() {
        let (_, mut replica) = setup();
        let local = state(1500, true, t0());
        assert_eq!(
            replica.reconcile(&record(100, false, t0() + secs(5)), &local, true, t0()),
            ReconcileOutcome::IgnoredAsLeader
        );
    }

    #[test]
    fn running_record_keeps_local_remaining() {
        let (_, mut replica) = setup();
        let local = state(1200, true, t0());
        let outcome = replica.reconcile(&record(1300, true, t0() + secs(1)), &local, false, t0());
        match outcome {
            ReconcileOutcome::Applied(s) => {
                assert_eq!(s.remaining_seconds, 1200);
                assert!(s.running);
            }
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn stopped_record_applies_remaining() {
        let (_, mut replica) = setup();
        let local = state(1200, true, t0());
        let outcome = replica.reconcile(&record(900, false, t0() + secs(1)), &local, false, t0());
        assert!(matches!(outcome, ReconcileOutcome::Applied(s) if s.remaining_seconds == 900 && !s.running));
    }

    #[test]
    fn running_record_for_another_phase_takes_remote_remaining() {
        let (_, mut replica) = setup();
        let local = state(1200, false, t0());
        let mut incoming = record(240, true, t0() + secs(1));
        incoming.state.phase = Phase::Break;
        incoming.state.total_seconds = 300;
        let outcome = replica.reconcile(&incoming, &local, false, t0());
        assert!(matches!(outcome, ReconcileOutcome::Applied(s) if s.remaining_seconds == 240));
    }

    #[test]
    fn out_of_order_records_settle_on_newest() {
        let local = state(1500, false, t0());
        let older = record(1000, false, t0() + secs(1));
        let newer = record(800, false, t0() + secs(2));

        for order in [[&older, &newer], [&newer, &older]] {
            let (_, mut replica) = setup();
            let mut adopted = local.clone();
            for rec in order {
                if let ReconcileOutcome::Applied(s) = replica.reconcile(rec, &adopted, false, t0()) {
                    adopted = s;
                }
            }
            assert_eq!(adopted.remaining_seconds, 800);
        }
    }

    #[test]
    fn push_marks_own_echo_stale() {
        let (store, mut replica) = setup();
        let mut feed = store.subscribe(&ada());
        let s = state(1500, true, t0());
        assert_eq!(replica.on_transition(&s, t0()), PushOutcome::Pushed);

        let echo = feed.try_next().unwrap();
        assert_eq!(replica.reconcile(&echo, &s, false, t0()), ReconcileOutcome::Stale);
    }

    #[test]
    fn guard_period_holds_back_pushes() {
        let (store, mut replica) = setup();
        let local = state(1500, false, t0());
        replica.reconcile(&record(1400, false, t0() + secs(1)), &local, false, t0());

        let s = state(1400, true, t0() + secs(1));
        assert_eq!(replica.on_transition(&s, t0() + secs(1)), PushOutcome::Suppressed);
        assert!(replica.has_pending());
        assert_eq!(store.write_count(), 0);

        assert_eq!(replica.on_periodic(&s, t0() + secs(2)), PushOutcome::Pushed);
        assert!(!replica.has_pending());
    }

    #[test]
    fn failed_push_is_retried() {
        let (store, mut replica) = setup();
        store.set_available(false);
        let s = state(1500, true, t0());
        assert_eq!(replica.on_transition(&s, t0()), PushOutcome::Failed);
        assert!(replica.has_pending());

        store.set_available(true);
        let later = state(1490, true, t0() + secs(10));
        assert_eq!(replica.on_periodic(&later, t0() + secs(10)), PushOutcome::Pushed);
        let stored = store.fetch(&ada()).unwrap().unwrap();
        assert_eq!(stored.state.remaining_seconds, 1490);
    }

    #[test]
    fn periodic_push_respects_interval_and_drift() {
        let (store, mut replica) = setup();
        replica.on_transition(&state(1500, true, t0()), t0());
        assert_eq!(store.write_count(), 1);

        // Interval not reached.
        assert_eq!(
            replica.on_periodic(&state(1490, true, t0() + secs(10)), t0() + secs(10)),
            PushOutcome::Idle
        );
        // Interval reached and drift 15s.
        assert_eq!(
            replica.on_periodic(&state(1485, true, t0() + secs(15)), t0() + secs(15)),
            PushOutcome::Pushed
        );
        // Paused: nothing periodic.
        assert_eq!(
            replica.on_periodic(&state(1485, false, t0() + secs(40)), t0() + secs(40)),
            PushOutcome::Idle
        );
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn hydrate_adopts_stored_record() {
        let (store, mut replica) = setup();
        assert!(replica.hydrate().unwrap().is_none());
        store.upsert(&record(600, true, t0())).unwrap();
        let s = replica.hydrate().unwrap().unwrap();
        assert_eq!(s.remaining_seconds, 600);
        assert_eq!(replica.last_applied(), Some(t0()));
    }
}
