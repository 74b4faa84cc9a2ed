mod config;
pub mod database;
mod settings_store;

pub use config::{Config, SyncConfig, TimerConfig};
pub use database::Database;
pub use settings_store::{LocalSettingsStore, SettingsModel, LOCAL_SETTINGS_KEY};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/homeroom[-dev]/` based on HOMEROOM_ENV.
///
/// Set HOMEROOM_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("HOMEROOM_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("homeroom-dev")
    } else {
        base_dir.join("homeroom")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
    Ok(dir)
}
