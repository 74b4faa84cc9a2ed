//! # Homeroom Core Library
//!
//! Focus-timer synchronization engine for a learner's open contexts (tabs,
//! windows, devices). Every context holds a replica of one session record;
//! exactly one of them, the leader, drives the countdown.
//!
//! ## Architecture
//!
//! - **Timer**: pure state machine; the owner calls `tick()` once per second
//! - **Sync**: local fan-out channel, leader election over heartbeats, and the
//!   replica synchronizer bridging to a durable store
//! - **Runtime**: the per-context event loop, a session hub handing out
//!   channels per learner, an async driver and a virtual-clock simulation
//! - **Storage**: SQLite-backed session store and settings, TOML configuration
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core timer state machine
//! - [`TimerContext`]: One open context
//! - [`SessionHub`]: Attaches contexts to their learner's channel
//! - [`SettingsModel`]: Settings load/update against the configured backend
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod runtime;
pub mod signal;
pub mod storage;
pub mod sync;
pub mod timer;

pub use error::{ConfigError, CoreError, DatabaseError, SettingsError, SignalError, StoreError};
pub use events::Event;
pub use runtime::{run_context, Command, SessionHub, TimerContext};
pub use signal::{CompletionSignal, SignalDescriptor, SignalDispatcher, SignalPlayer};
pub use storage::{Config, Database, LocalSettingsStore, SettingsModel, SyncConfig};
pub use sync::{ContextId, LearnerId, MemoryStore, SessionRecord, SessionStore, SqliteStore};
pub use timer::{Phase, SessionState, Settings, TimerEngine, TimerState};
