//! Per-process registry of learners' fan-out channels.
//!
//! Contexts of the same learner attached through one hub share a channel;
//! different learners never see each other's messages.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::context::TimerContext;
use crate::error::CoreError;
use crate::signal::{NullPlayer, SignalPlayer};
use crate::storage::{Config, LocalSettingsStore, SettingsModel, SyncConfig};
use crate::sync::{ContextId, FanoutBus, LearnerId, SharedStore};
use crate::timer::Settings;

/// Everything a context is built from.
pub(crate) struct ContextWiring {
    pub id: ContextId,
    pub learner: LearnerId,
    pub bus: FanoutBus,
    pub store: Option<SharedStore>,
    pub local_settings: Option<LocalSettingsStore>,
    pub settings: SettingsModel,
    pub config: SyncConfig,
    pub player: Box<dyn SignalPlayer>,
}

pub struct SessionHub {
    config: SyncConfig,
    defaults: Settings,
    store: Option<SharedStore>,
    local_settings: Option<LocalSettingsStore>,
    buses: Mutex<HashMap<LearnerId, FanoutBus>>,
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("config", &self.config)
            .field("durable", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionHub {
    pub fn new(config: SyncConfig, defaults: Settings) -> Self {
        Self {
            config,
            defaults,
            store: None,
            local_settings: None,
            buses: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sync.clone(), config.settings())
    }

    /// Authenticated mode: sessions are persisted in `store`.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Where settings go when there is no durable store.
    pub fn with_local_settings(mut self, local: LocalSettingsStore) -> Self {
        self.local_settings = Some(local);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&SharedStore> {
        self.store.as_ref()
    }

    /// The learner's channel, created on first use.
    pub fn bus(&self, learner: &LearnerId) -> FanoutBus {
        let mut buses = self.buses.lock().unwrap_or_else(|e| e.into_inner());
        buses
            .entry(learner.clone())
            .or_insert_with(|| FanoutBus::new(self.config.channel_capacity))
            .clone()
    }

    pub fn settings_model(&self, learner: &LearnerId) -> SettingsModel {
        match (&self.store, &self.local_settings) {
            (Some(store), _) => SettingsModel::remote(store.clone(), learner.clone(), self.defaults.clone()),
            (None, Some(local)) => SettingsModel::local(local.clone(), self.defaults.clone()),
            (None, None) => SettingsModel::ephemeral(self.defaults.clone()),
        }
    }

    /// Change the learner's settings the way a user acting in a new context
    /// would: the context claims leadership, applies, publishes and detaches.
    ///
    /// A live leader in this hub is superseded by the claim and picks the new
    /// settings up from the published state. Rejected settings change nothing.
    pub fn update_settings(
        &self,
        learner: &LearnerId,
        settings: Settings,
        now: DateTime<Utc>,
    ) -> Result<Settings, CoreError> {
        settings.validate()?;
        let mut ctx = self.attach(learner, now);
        ctx.update_settings(settings, now)?;
        let applied = ctx.state().settings.clone();
        ctx.detach(now);
        tracing::info!(
            learner = %learner,
            work = applied.work_minutes,
            short_break = applied.short_break_minutes,
            long_break = applied.long_break_minutes,
            cycles = applied.cycles_until_long_break,
            "settings updated"
        );
        Ok(applied)
    }

    /// Attach a new headless context with a fresh id.
    pub fn attach(&self, learner: &LearnerId, now: DateTime<Utc>) -> TimerContext {
        self.attach_with(learner, ContextId::generate(), Box::new(NullPlayer), now)
    }

    pub fn attach_with(
        &self,
        learner: &LearnerId,
        id: ContextId,
        player: Box<dyn SignalPlayer>,
        now: DateTime<Utc>,
    ) -> TimerContext {
        let wiring = ContextWiring {
            id,
            learner: learner.clone(),
            bus: self.bus(learner),
            store: self.store.clone(),
            local_settings: self.local_settings.clone(),
            settings: self.settings_model(learner),
            config: self.config.clone(),
            player,
        };
        TimerContext::new(wiring, now)
    }
}
