//! One open timer context (a tab, window or process).
//!
//! A context owns a replica of the learner's session and decides, through the
//! leadership coordinator, whether it is the one driving the countdown. The
//! step API is deterministic: every call takes `now`, nothing reads the clock.
//!
//! Command handling order: drain pending inbound messages, claim leadership,
//! act on the engine, publish the result.

use chrono::{DateTime, Utc};

use super::hub::ContextWiring;
use crate::error::SettingsError;
use crate::events::Event;
use crate::signal::SignalDispatcher;
use crate::storage::LocalSettingsStore;
use crate::sync::{
    ChangeFeed, ChannelMessage, ContextId, FanoutBus, LeadershipChange, LeadershipClaim,
    LeadershipCoordinator, LearnerId, ReconcileOutcome, ReplicaSynchronizer, Role, SessionRecord,
    StalenessGuard, Subscription,
};
use crate::timer::{Phase, SessionState, Settings, TimerEngine};

/// Something that arrived from outside the context.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Channel(ChannelMessage),
    Remote(SessionRecord),
}

pub struct TimerContext {
    id: ContextId,
    learner: LearnerId,
    engine: TimerEngine,
    leadership: LeadershipCoordinator,
    bus: FanoutBus,
    inbox: Subscription,
    replica: Option<ReplicaSynchronizer>,
    feed: Option<ChangeFeed>,
    /// Staleness guard for `state_update` messages on the local channel.
    local_guard: StalenessGuard,
    local_settings: Option<LocalSettingsStore>,
    signals: SignalDispatcher,
}

impl std::fmt::Debug for TimerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerContext")
            .field("id", &self.id)
            .field("learner", &self.learner)
            .field("role", &self.leadership.role())
            .field("state", self.engine.state())
            .finish_non_exhaustive()
    }
}

impl TimerContext {
    pub(crate) fn new(wiring: ContextWiring, now: DateTime<Utc>) -> Self {
        let ContextWiring {
            id,
            learner,
            bus,
            store,
            local_settings,
            settings,
            config,
            player,
        } = wiring;

        // Subscribe before the point query so nothing written in between is lost.
        let inbox = bus.subscribe(id.clone());
        let mut replica = store.map(|store| ReplicaSynchronizer::new(store, learner.clone(), &config));
        let feed = replica.as_ref().map(ReplicaSynchronizer::subscribe);

        let hydrated = match replica.as_mut().map(ReplicaSynchronizer::hydrate) {
            Some(Ok(state)) => state,
            Some(Err(e)) => {
                tracing::warn!(learner = %learner, error = %e, "could not hydrate session, starting fresh");
                None
            }
            None => None,
        };
        let engine = match hydrated {
            Some(state) => TimerEngine::from_state(state),
            None => TimerEngine::new(settings.load(), now),
        };

        tracing::info!(
            context = %id,
            learner = %learner,
            durable = replica.is_some(),
            phase = %engine.phase(),
            remaining = engine.remaining_secs(),
            "context attached"
        );

        let mut leadership = LeadershipCoordinator::new(id.clone(), &config, now);
        leadership.observe_sequence(bus.high_water());

        Self {
            leadership,
            id,
            learner,
            engine,
            bus,
            inbox,
            replica,
            feed,
            local_guard: StalenessGuard::new(),
            local_settings,
            signals: SignalDispatcher::new(player),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn learner(&self) -> &LearnerId {
        &self.learner
    }

    pub fn role(&self) -> Role {
        self.leadership.role()
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.is_leader()
    }

    pub fn leadership(&self) -> &LeadershipCoordinator {
        &self.leadership
    }

    pub fn state(&self) -> &SessionState {
        self.engine.state()
    }

    pub fn engine(&self) -> &TimerEngine {
        &self.engine
    }

    /// Completion signals this context has fired.
    pub fn signals_dispatched(&self) -> u64 {
        self.signals.dispatched()
    }

    pub fn has_pending_push(&self) -> bool {
        self.replica.as_ref().is_some_and(ReplicaSynchronizer::has_pending)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Event {
        self.engine.snapshot(now)
    }

    // ── Step API ─────────────────────────────────────────────────────

    /// Process inbound messages, run the election check, send a heartbeat if
    /// due and retry or schedule store pushes.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = self.drain(now);

        let promoted = matches!(
            self.leadership.check_silence(now),
            Some(LeadershipChange::Promoted { .. })
        );
        if self.leadership.heartbeat_due(now) {
            self.send_heartbeat(now);
        }
        if promoted {
            events.push(self.elected(now));
        }
        if self.leadership.is_leader() {
            if let Some(replica) = self.replica.as_mut() {
                replica.on_periodic(self.engine.state(), now);
            }
        }
        events
    }

    /// One second of countdown. Only the leader ticks.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if !self.leadership.is_leader() {
            return None;
        }
        let was_running = self.engine.is_running();
        let event = self.engine.tick(now);
        match &event {
            Some(e) if e.is_completion() => {
                self.on_completion(e);
                self.publish_transition(now);
            }
            _ if was_running && self.replica.is_none() => self.broadcast_state(now),
            _ => {}
        }
        event
    }

    /// Poll then tick; what the driver does once per second.
    pub fn step(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = self.poll(now);
        events.extend(self.tick(now));
        events
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Take leadership on user intent without acting yet.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = self.drain(now);
        if let Some(LeadershipChange::Promoted { .. }) = self.leadership.claim(now) {
            self.send_heartbeat(now);
            events.push(self.elected(now));
        }
        events
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        self.command(now, TimerEngine::start)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        self.command(now, TimerEngine::pause)
    }

    pub fn reset(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        self.command(now, TimerEngine::reset)
    }

    pub fn skip(&mut self, to: Phase, now: DateTime<Utc>) -> Vec<Event> {
        self.command(now, |engine, now| Some(engine.skip(to, now)))
    }

    /// Replace settings. Rejected settings change nothing, leadership included.
    pub fn update_settings(
        &mut self,
        settings: Settings,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, SettingsError> {
        settings.validate()?;
        if let (None, Some(local)) = (&self.replica, &self.local_settings) {
            if let Err(e) = local.save(&settings) {
                tracing::warn!(error = %e, "could not save local settings");
            }
        }
        Ok(self.command(now, |engine, now| Some(engine.apply_settings(settings, now))))
    }

    /// Leave gracefully: a leader pushes its final state and hands
    /// leadership over.
    pub fn detach(mut self, now: DateTime<Utc>) {
        if self.leadership.is_leader() {
            if let Some(replica) = self.replica.as_mut() {
                replica.on_transition(self.engine.state(), now);
            }
        }
        if let Some(claim) = self.leadership.resign(now) {
            self.bus.publish(ChannelMessage::Resign {
                sender: claim.holder,
                timestamp: claim.timestamp,
                sequence: claim.sequence,
            });
        }
        tracing::info!(context = %self.id, "context detached");
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Wait for the next message from the channel or the change feed.
    pub async fn next_inbound(&mut self) -> Option<Inbound> {
        let inbox = &mut self.inbox;
        match self.feed.as_mut() {
            Some(feed) => tokio::select! {
                Some(msg) = inbox.next() => Some(Inbound::Channel(msg)),
                Some(record) = feed.next() => Some(Inbound::Remote(record)),
                else => None,
            },
            None => inbox.next().await.map(Inbound::Channel),
        }
    }

    pub fn handle_inbound(&mut self, inbound: Inbound, now: DateTime<Utc>) -> Vec<Event> {
        match inbound {
            Inbound::Channel(msg) => self.handle_message(msg, now),
            Inbound::Remote(record) => self.handle_record(&record, now),
        }
    }

    fn drain(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(msg) = self.inbox.try_next() {
            events.extend(self.handle_message(msg, now));
        }
        while let Some(record) = self.feed.as_mut().and_then(ChangeFeed::try_next) {
            events.extend(self.handle_record(&record, now));
        }
        events
    }

    fn handle_message(&mut self, msg: ChannelMessage, now: DateTime<Utc>) -> Vec<Event> {
        match msg {
            ChannelMessage::LeaderHeartbeat {
                sender,
                timestamp,
                sequence,
            } => {
                let claim = LeadershipClaim {
                    holder: sender,
                    timestamp,
                    sequence,
                };
                match self.leadership.observe_heartbeat(&claim, now) {
                    Some(LeadershipChange::Demoted { by }) => {
                        if let Some(replica) = self.replica.as_mut() {
                            replica.clear_pending();
                        }
                        vec![Event::LeaderDemoted {
                            context_id: self.id.clone(),
                            superseded_by: by,
                            at: now,
                        }]
                    }
                    _ => Vec::new(),
                }
            }
            ChannelMessage::StateUpdate {
                sequence, payload, ..
            } => {
                self.leadership.observe_sequence(sequence);
                if self.leadership.is_leader() || self.replica.is_some() {
                    return Vec::new();
                }
                if !self.local_guard.admit(payload.updated_at) {
                    tracing::debug!(context = %self.id, updated_at = %payload.updated_at, "discarding stale state update");
                    return Vec::new();
                }
                self.engine.restore(payload);
                vec![self.remote_applied()]
            }
            ChannelMessage::Resign {
                sender, sequence, ..
            } => {
                self.leadership.observe_resign(&sender, sequence, now);
                Vec::new()
            }
        }
    }

    fn handle_record(&mut self, record: &SessionRecord, now: DateTime<Utc>) -> Vec<Event> {
        let Some(replica) = self.replica.as_mut() else {
            return Vec::new();
        };
        match replica.reconcile(record, self.engine.state(), self.leadership.is_leader(), now) {
            ReconcileOutcome::Applied(state) => {
                self.engine.restore(state);
                vec![self.remote_applied()]
            }
            ReconcileOutcome::IgnoredAsLeader | ReconcileOutcome::Stale => Vec::new(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn command(
        &mut self,
        now: DateTime<Utc>,
        act: impl FnOnce(&mut TimerEngine, DateTime<Utc>) -> Option<Event>,
    ) -> Vec<Event> {
        let mut events = self.claim(now);
        if let Some(event) = act(&mut self.engine, now) {
            if event.is_completion() {
                self.on_completion(&event);
            }
            self.publish_transition(now);
            events.push(event);
        }
        events
    }

    /// Reported after the promotion heartbeat went out, carrying its sequence.
    fn elected(&self, now: DateTime<Utc>) -> Event {
        Event::LeaderElected {
            context_id: self.id.clone(),
            sequence: self.leadership.heartbeat_sequence(),
            at: now,
        }
    }

    fn remote_applied(&self) -> Event {
        let state = self.engine.state();
        Event::RemoteApplied {
            phase: state.phase,
            running: state.running,
            remaining_secs: state.remaining_seconds,
            updated_at: state.updated_at,
        }
    }

    fn on_completion(&mut self, event: &Event) {
        if let Event::PhaseCompleted {
            from,
            to,
            cycles_completed,
            long_break,
            ..
        } = event
        {
            tracing::info!(
                context = %self.id,
                from = %from,
                to = %to,
                cycles = cycles_completed,
                long_break,
                "phase completed"
            );
        }
        self.signals.dispatch(self.engine.settings());
    }

    fn send_heartbeat(&mut self, now: DateTime<Utc>) {
        let Some(claim) = self.leadership.heartbeat(now) else {
            return;
        };
        tracing::debug!(context = %self.id, sequence = claim.sequence, "heartbeat");
        self.bus.publish(ChannelMessage::heartbeat(&claim));
        if self.replica.is_none() {
            self.broadcast_state(now);
        }
    }

    /// Full state on the local channel. Only used without a durable store.
    fn broadcast_state(&mut self, now: DateTime<Utc>) {
        let sequence = self.leadership.next_sequence();
        self.bus.publish(ChannelMessage::StateUpdate {
            sender: self.id.clone(),
            timestamp: now,
            sequence,
            payload: self.engine.state().clone(),
        });
    }

    fn publish_transition(&mut self, now: DateTime<Utc>) {
        match self.replica.as_mut() {
            Some(replica) => {
                replica.on_transition(self.engine.state(), now);
            }
            None => self.broadcast_state(now),
        }
    }
}
