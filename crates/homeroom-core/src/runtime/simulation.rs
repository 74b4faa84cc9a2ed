//! Deterministic multi-context simulation on a virtual clock.
//!
//! Runs several contexts of one learner in a single thread, stepping a fake
//! clock, so leadership and failover can be observed and tested without
//! waiting on real time. Context ids and election jitter are derived from the
//! scenario seed, so a scenario replays identically.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::context::TimerContext;
use super::hub::SessionHub;
use crate::error::CoreError;
use crate::events::Event;
use crate::signal::NullPlayer;
use crate::storage::SyncConfig;
use crate::sync::{ContextId, LearnerId, MemoryStore, SharedStore};
use crate::timer::{SessionState, Settings};

/// Seed for the election jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulationSeed(pub u64);

impl SimulationSeed {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }
}

impl Default for SimulationSeed {
    fn default() -> Self {
        Self(42)
    }
}

/// How the leader goes away when a kill is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderExit {
    /// Closed without a word; followers wait out the silence window.
    Crash,
    /// Detached with a resign message.
    Resign,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationScenario {
    pub name: String,
    pub seed: SimulationSeed,
    pub contexts: usize,
    /// Simulated duration.
    pub seconds: u64,
    /// Virtual clock resolution.
    pub step_ms: u64,
    /// Second at which the first context starts the timer, if any.
    pub start_at: Option<u64>,
    /// Second at which the current leader goes away, if any.
    pub kill_leader_at: Option<u64>,
    pub leader_exit: LeaderExit,
    /// Use a durable in-memory store instead of local state broadcasts.
    pub durable: bool,
    pub settings: Settings,
    pub sync: SyncConfig,
}

impl SimulationScenario {
    pub fn new(name: impl Into<String>, seed: SimulationSeed) -> Self {
        Self {
            name: name.into(),
            seed,
            contexts: 3,
            seconds: 60,
            step_ms: 250,
            start_at: Some(0),
            kill_leader_at: None,
            leader_exit: LeaderExit::Crash,
            durable: false,
            settings: Settings::default(),
            sync: SyncConfig::default(),
        }
    }

    pub fn with_contexts(mut self, contexts: usize) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_seconds(mut self, seconds: u64) -> Self {
        self.seconds = seconds;
        self
    }

    pub fn with_start_at(mut self, start_at: Option<u64>) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn with_kill_leader_at(mut self, at: Option<u64>, exit: LeaderExit) -> Self {
        self.kill_leader_at = at;
        self.leader_exit = exit;
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}

/// One event observed during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Milliseconds since the start of the run.
    pub at_ms: u64,
    pub context: ContextId,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub context: ContextId,
    pub leader: bool,
    pub alive: bool,
    pub signals: u64,
    pub state: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scenario: String,
    pub timeline: Vec<TimelineEntry>,
    /// Highest number of leaders seen at the end of any step.
    pub max_concurrent_leaders: usize,
    /// Step-end leader count was exactly one from this point on.
    pub converged_at_ms: Option<u64>,
    pub contexts: Vec<ContextSummary>,
}

impl SimulationResult {
    /// `(at_ms, context)` for every election.
    pub fn elections(&self) -> Vec<(u64, ContextId)> {
        self.timeline
            .iter()
            .filter(|e| matches!(e.event, Event::LeaderElected { .. }))
            .map(|e| (e.at_ms, e.context.clone()))
            .collect()
    }

    pub fn completions(&self) -> usize {
        self.timeline.iter().filter(|e| e.event.is_completion()).count()
    }

    pub fn total_signals(&self) -> u64 {
        self.contexts.iter().map(|c| c.signals).sum()
    }
}

struct Slot {
    ctx: Option<TimerContext>,
    last: Option<ContextSummary>,
}

pub struct SimulationHarness {
    epoch: DateTime<Utc>,
}

impl Default for SimulationHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationHarness {
    pub fn new() -> Self {
        Self {
            epoch: Utc
                .with_ymd_and_hms(2026, 1, 5, 8, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    pub fn run(&self, scenario: &SimulationScenario) -> Result<SimulationResult, CoreError> {
        let mut sync = scenario.sync.clone();
        sync.election_seed = scenario.seed.0.max(1);

        let mut hub = SessionHub::new(sync, scenario.settings.clone());
        if scenario.durable {
            let store: SharedStore = Arc::new(MemoryStore::new());
            hub = hub.with_store(store);
        }
        let learner = LearnerId::new(format!("sim-{}", scenario.name))?;

        let mut slots = Vec::with_capacity(scenario.contexts);
        for i in 0..scenario.contexts {
            let id = ContextId::parse(&format!("ctx-sim-{i:02}"))?;
            slots.push(Slot {
                ctx: Some(hub.attach_with(&learner, id, Box::new(NullPlayer), self.epoch)),
                last: None,
            });
        }

        let step_ms = scenario.step_ms.clamp(1, 1000);
        let end_ms = scenario.seconds.saturating_mul(1000);
        let mut timeline = Vec::new();
        let mut max_concurrent_leaders = 0;
        let mut converged_at_ms = None;
        let mut started = false;
        let mut killed = false;
        let mut next_tick_ms = 1000;

        let mut at_ms = 0;
        while at_ms <= end_ms {
            let now = self.epoch + Duration::milliseconds(at_ms as i64);
            let mut record = |ctx: &TimerContext, events: Vec<Event>| {
                for event in events {
                    timeline.push(TimelineEntry {
                        at_ms,
                        context: ctx.id().clone(),
                        event,
                    });
                }
            };

            if !started && scenario.start_at.is_some_and(|s| at_ms >= s * 1000) {
                started = true;
                if let Some(ctx) = slots.iter_mut().find_map(|s| s.ctx.as_mut()) {
                    let events = ctx.start(now);
                    record(ctx, events);
                }
            }

            if !killed && scenario.kill_leader_at.is_some_and(|k| at_ms >= k * 1000) {
                killed = true;
                if let Some(slot) = slots
                    .iter_mut()
                    .find(|s| s.ctx.as_ref().is_some_and(TimerContext::is_leader))
                {
                    if let Some(ctx) = slot.ctx.take() {
                        slot.last = Some(summary(&ctx, false));
                        tracing::info!(context = %ctx.id(), at_ms, exit = ?scenario.leader_exit, "leader removed");
                        match scenario.leader_exit {
                            LeaderExit::Crash => drop(ctx),
                            LeaderExit::Resign => ctx.detach(now),
                        }
                    }
                }
            }

            let tick = at_ms >= next_tick_ms;
            for ctx in slots.iter_mut().filter_map(|s| s.ctx.as_mut()) {
                let mut events = ctx.poll(now);
                if tick {
                    events.extend(ctx.tick(now));
                }
                record(ctx, events);
            }
            if tick {
                next_tick_ms += 1000;
            }

            let leaders = slots
                .iter()
                .filter(|s| s.ctx.as_ref().is_some_and(TimerContext::is_leader))
                .count();
            max_concurrent_leaders = max_concurrent_leaders.max(leaders);
            match (leaders, converged_at_ms) {
                (1, None) => converged_at_ms = Some(at_ms),
                (1, Some(_)) => {}
                _ => converged_at_ms = None,
            }

            at_ms += step_ms;
        }

        let contexts = slots
            .into_iter()
            .filter_map(|slot| match slot.ctx {
                Some(ctx) => Some(summary(&ctx, true)),
                None => slot.last,
            })
            .collect();

        Ok(SimulationResult {
            scenario: scenario.name.clone(),
            timeline,
            max_concurrent_leaders,
            converged_at_ms,
            contexts,
        })
    }
}

fn summary(ctx: &TimerContext, alive: bool) -> ContextSummary {
    ContextSummary {
        context: ctx.id().clone(),
        leader: alive && ctx.is_leader(),
        alive,
        signals: ctx.signals_dispatched(),
        state: ctx.state().clone(),
    }
}
