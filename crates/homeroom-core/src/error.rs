//! Core error types for homeroom-core.
//!
//! Transport failures and invalid settings are the only real failure modes of
//! the timer engine. Stale data and leadership races are expected conditions and
//! never surface as errors.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for homeroom-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Settings rejected at the model boundary
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Durable store failures
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Durable session records are only written by a leading context
    #[error("Session settings can only be changed through a timer context")]
    LeaderOnly,

    /// Malformed context or learner id
    #[error("Identifier error: {0}")]
    Id(#[from] crate::sync::IdError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid settings. Nothing is applied when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl SettingsError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        SettingsError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Durable store (transport) failures.
///
/// These are logged and retried on the next push; the leader's in-memory
/// state stays authoritative in the meantime.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Record could not be encoded or decoded
    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing database failed
    #[error("Store database failure: {0}")]
    Database(#[from] DatabaseError),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Data directory could not be determined or created
    #[error("Failed to prepare data directory: {0}")]
    DataDir(String),

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Completion signal playback failures. Always swallowed by the dispatcher.
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Audio output unavailable: {0}")]
    Unavailable(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
