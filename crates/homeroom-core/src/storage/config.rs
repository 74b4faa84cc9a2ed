//! TOML-based application configuration.
//!
//! Stores:
//! - Default timer settings for learners without a stored record
//! - Synchronization tunables (heartbeat cadence, silence window, guard period,
//!   push cadence)
//! - The learner id the CLI acts for
//!
//! Configuration is stored at `~/.config/homeroom/config.toml`.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::{ConfigError, SettingsError};
use crate::signal::CompletionSignal;
use crate::timer::{PresentationFlags, Settings};

/// Default timer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u32,
    #[serde(default = "default_short_break")]
    pub short_break_minutes: u32,
    #[serde(default = "default_long_break")]
    pub long_break_minutes: u32,
    #[serde(default = "default_cycles_until_long_break")]
    pub cycles_until_long_break: u32,
    #[serde(default)]
    pub completion_signal: CompletionSignal,
    #[serde(default = "default_volume")]
    pub signal_volume: u8,
    #[serde(default = "default_true")]
    pub show_remaining_in_title: bool,
    #[serde(default = "default_true")]
    pub show_progress_ring: bool,
    #[serde(default)]
    pub visual_flourish: bool,
}

/// Synchronization tunables.
///
/// The silence window should be a small multiple of the heartbeat interval;
/// failover takes roughly one silence window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_silence_window_ms")]
    pub silence_window_ms: u64,
    /// Upper bound of the random per-context delay added to the silence window.
    #[serde(default = "default_election_jitter_ms")]
    pub election_jitter_ms: u64,
    /// 0 seeds the election jitter from entropy.
    #[serde(default)]
    pub election_seed: u64,
    #[serde(default = "default_guard_period_ms")]
    pub guard_period_ms: u64,
    #[serde(default = "default_push_interval_secs")]
    pub push_interval_secs: u64,
    #[serde(default = "default_min_push_drift_secs")]
    pub min_push_drift_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Persist sessions in the SQLite store. When off, sessions live only in
    /// the running process and settings fall back to the local row.
    #[serde(default = "default_true")]
    pub durable_store: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/homeroom/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_learner_id")]
    pub learner_id: String,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

// Default functions
fn default_work_minutes() -> u32 {
    25
}
fn default_short_break() -> u32 {
    5
}
fn default_long_break() -> u32 {
    15
}
fn default_cycles_until_long_break() -> u32 {
    4
}
fn default_volume() -> u8 {
    70
}
fn default_true() -> bool {
    true
}
fn default_heartbeat_interval_ms() -> u64 {
    2_000
}
fn default_silence_window_ms() -> u64 {
    10_000
}
fn default_election_jitter_ms() -> u64 {
    500
}
fn default_guard_period_ms() -> u64 {
    2_000
}
fn default_push_interval_secs() -> u64 {
    15
}
fn default_min_push_drift_secs() -> u64 {
    10
}
fn default_channel_capacity() -> usize {
    256
}
fn default_learner_id() -> String {
    "local".into()
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            short_break_minutes: default_short_break(),
            long_break_minutes: default_long_break(),
            cycles_until_long_break: default_cycles_until_long_break(),
            completion_signal: CompletionSignal::default(),
            signal_volume: default_volume(),
            show_remaining_in_title: true,
            show_progress_ring: true,
            visual_flourish: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            silence_window_ms: default_silence_window_ms(),
            election_jitter_ms: default_election_jitter_ms(),
            election_seed: 0,
            guard_period_ms: default_guard_period_ms(),
            push_interval_secs: default_push_interval_secs(),
            min_push_drift_secs: default_min_push_drift_secs(),
            channel_capacity: default_channel_capacity(),
            durable_store: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            learner_id: default_learner_id(),
            timer: TimerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl TimerConfig {
    pub fn settings(&self) -> Settings {
        Settings {
            work_minutes: self.work_minutes,
            short_break_minutes: self.short_break_minutes,
            long_break_minutes: self.long_break_minutes,
            cycles_until_long_break: self.cycles_until_long_break,
            presentation: PresentationFlags {
                show_remaining_in_title: self.show_remaining_in_title,
                show_progress_ring: self.show_progress_ring,
                visual_flourish: self.visual_flourish,
            },
            completion_signal: self.completion_signal,
            signal_volume: self.signal_volume,
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

impl SyncConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        millis(self.heartbeat_interval_ms)
    }

    pub fn silence_window(&self) -> Duration {
        millis(self.silence_window_ms)
    }

    pub fn election_jitter(&self) -> Duration {
        millis(self.election_jitter_ms)
    }

    pub fn guard_period(&self) -> Duration {
        millis(self.guard_period_ms)
    }

    pub fn push_interval(&self) -> Duration {
        millis(self.push_interval_secs.saturating_mul(1000))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: format!("sync.{key}"),
            message: message.to_string(),
        };
        if self.heartbeat_interval_ms == 0 {
            return Err(invalid("heartbeat_interval_ms", "must be positive"));
        }
        if self.silence_window_ms <= self.heartbeat_interval_ms {
            return Err(invalid(
                "silence_window_ms",
                "must be longer than the heartbeat interval",
            ));
        }
        if self.push_interval_secs == 0 {
            return Err(invalid("push_interval_secs", "must be positive"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", "must be positive"));
        }
        Ok(())
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as bool")))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location of the configuration file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return (and write) the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without persisting.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the resulting configuration is invalid. `self` is left untouched on
    /// error.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Reject sync tunables that break the protocol and timer defaults a
    /// context could not run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate()?;
        self.timer
            .settings()
            .validate()
            .map_err(|SettingsError::InvalidValue { field, message }| ConfigError::InvalidValue {
                key: format!("timer.{field}"),
                message,
            })
    }

    /// Set a config value by key and save to the default location.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Default settings for learners without a stored record.
    pub fn settings(&self) -> Settings {
        self.timer.settings()
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default configuration");
            Self::default()
        })
    }
}
