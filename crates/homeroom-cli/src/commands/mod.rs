pub mod config;
pub mod settings;
pub mod simulate;
pub mod timer;
pub mod watch;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use homeroom_core::{
    Config, Database, Event, LearnerId, LocalSettingsStore, SessionHub, SqliteStore, TimerContext,
};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Everything an acting command needs: config, learner and a wired hub.
pub struct Session {
    pub config: Config,
    pub learner: LearnerId,
    pub hub: SessionHub,
}

/// Load the config and wire a hub to the on-disk database.
///
/// With `sync.durable_store` on, sessions are kept in SQLite. Otherwise only
/// the settings row is persisted and sessions live as long as the process.
pub fn open_session(learner: Option<&str>) -> CliResult<Session> {
    let config = Config::load()?;
    let learner = LearnerId::new(learner.unwrap_or(&config.learner_id))?;
    let db = Database::open()?;
    let hub = SessionHub::from_config(&config);
    let hub = if config.sync.durable_store {
        hub.with_store(Arc::new(SqliteStore::new(db)))
    } else {
        hub.with_local_settings(LocalSettingsStore::new(db))
    };
    Ok(Session {
        config,
        learner,
        hub,
    })
}

/// Replay the whole seconds a running session spent with no context open.
pub fn catch_up(ctx: &mut TimerContext, now: DateTime<Utc>) -> Vec<Event> {
    let mut events = Vec::new();
    while ctx.state().running {
        let next = ctx.state().updated_at + Duration::seconds(1);
        if next > now {
            break;
        }
        events.extend(ctx.tick(next));
    }
    events
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
