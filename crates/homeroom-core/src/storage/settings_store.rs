//! Settings persistence.
//!
//! With a durable store configured, settings live inside the learner's session
//! record. Without one they are kept in the local key/value table under
//! [`LOCAL_SETTINGS_KEY`].

use std::sync::{Arc, Mutex};

use super::database::Database;
use crate::error::{CoreError, DatabaseError};
use crate::sync::{LearnerId, SharedStore};
use crate::timer::Settings;

/// Key of the local-only settings row.
pub const LOCAL_SETTINGS_KEY: &str = "focus_timer_settings";

/// Local-only settings, used when the learner has no durable store.
#[derive(Clone)]
pub struct LocalSettingsStore {
    db: Arc<Mutex<Database>>,
}

impl std::fmt::Debug for LocalSettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSettingsStore").finish_non_exhaustive()
    }
}

impl LocalSettingsStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// `Ok(None)` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<Settings>, CoreError> {
        let raw = {
            let db = self.db.lock().map_err(|_| DatabaseError::Locked)?;
            db.kv_get(LOCAL_SETTINGS_KEY)?
        };
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), CoreError> {
        let json = serde_json::to_string(settings)?;
        let db = self.db.lock().map_err(|_| DatabaseError::Locked)?;
        db.kv_set(LOCAL_SETTINGS_KEY, &json)?;
        Ok(())
    }
}

/// Load/update entry point for settings, whichever backend applies.
#[derive(Clone)]
pub struct SettingsModel {
    remote: Option<(SharedStore, LearnerId)>,
    local: Option<LocalSettingsStore>,
    defaults: Settings,
}

impl std::fmt::Debug for SettingsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsModel")
            .field("learner", &self.remote.as_ref().map(|(_, l)| l))
            .field("local", &self.local.is_some())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl SettingsModel {
    /// Settings kept inside the learner's durable record.
    pub fn remote(store: SharedStore, learner: LearnerId, defaults: Settings) -> Self {
        Self {
            remote: Some((store, learner)),
            local: None,
            defaults,
        }
    }

    /// Settings kept in the local key/value row.
    pub fn local(store: LocalSettingsStore, defaults: Settings) -> Self {
        Self {
            remote: None,
            local: Some(store),
            defaults,
        }
    }

    /// Built-in defaults only; nothing is persisted.
    pub fn ephemeral(defaults: Settings) -> Self {
        Self {
            remote: None,
            local: None,
            defaults,
        }
    }

    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    /// Last known settings. Never fails: backend errors fall back to defaults.
    pub fn load(&self) -> Settings {
        let loaded = match (&self.remote, &self.local) {
            (Some((store, learner)), _) => store
                .fetch(learner)
                .map(|record| record.map(|r| r.state.settings))
                .map_err(CoreError::from),
            (None, Some(local)) => local.load(),
            (None, None) => Ok(None),
        };
        match loaded {
            Ok(Some(settings)) => settings,
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load settings, using defaults");
                self.defaults.clone()
            }
        }
    }

    /// Validate and persist new settings.
    ///
    /// Nothing is written when validation fails. With a durable store the
    /// settings live in the session record, which only the leading context
    /// writes, so this returns [`CoreError::LeaderOnly`]; go through
    /// `SessionHub::update_settings` or `TimerContext::update_settings`.
    pub fn update(&self, settings: Settings) -> Result<Settings, CoreError> {
        settings.validate()?;
        match (&self.remote, &self.local) {
            (Some(_), _) => return Err(CoreError::LeaderOnly),
            (None, Some(local)) => local.save(&settings)?,
            (None, None) => {}
        }
        tracing::info!(
            work = settings.work_minutes,
            short_break = settings.short_break_minutes,
            long_break = settings.long_break_minutes,
            cycles = settings.cycles_until_long_break,
            "settings updated"
        );
        Ok(settings)
    }
}
