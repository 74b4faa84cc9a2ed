//! Durable session store and its change feed.
//!
//! The store is a plain upsert-by-learner table. Every successful upsert is
//! announced to subscribers of that learner; delivery is at-least-once and
//! unordered as far as consumers are concerned, so readers compare
//! `updatedAt` themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::ids::LearnerId;
use crate::error::StoreError;
use crate::storage::Database;
use crate::timer::SessionState;

/// One learner's row in the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub learner_id: LearnerId,
    #[serde(flatten)]
    pub state: SessionState,
}

impl SessionRecord {
    pub fn new(learner_id: LearnerId, state: SessionState) -> Self {
        Self { learner_id, state }
    }
}

/// Durable, cross-device storage for session records.
pub trait SessionStore: Send + Sync {
    /// Point query, used on attach.
    fn fetch(&self, learner: &LearnerId) -> Result<Option<SessionRecord>, StoreError>;

    /// Insert or replace the learner's record and notify subscribers.
    fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Change feed for one learner.
    fn subscribe(&self, learner: &LearnerId) -> ChangeFeed;
}

/// Fan-out of upserted records to in-process subscribers.
#[derive(Debug, Clone)]
struct Notifier {
    tx: broadcast::Sender<SessionRecord>,
}

impl Notifier {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    fn notify(&self, record: &SessionRecord) {
        // Nobody listening is fine.
        let _ = self.tx.send(record.clone());
    }

    fn subscribe(&self, learner: &LearnerId) -> ChangeFeed {
        ChangeFeed {
            learner: learner.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

/// Records written for one learner, as they happen.
#[derive(Debug)]
pub struct ChangeFeed {
    learner: LearnerId,
    rx: broadcast::Receiver<SessionRecord>,
}

impl ChangeFeed {
    pub fn learner(&self) -> &LearnerId {
        &self.learner
    }

    /// Next pending change, without waiting.
    pub fn try_next(&mut self) -> Option<SessionRecord> {
        loop {
            match self.rx.try_recv() {
                Ok(record) if record.learner_id == self.learner => return Some(record),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(learner = %self.learner, skipped, "change feed lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<SessionRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) if record.learner_id == self.learner => return Some(record),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(learner = %self.learner, skipped, "change feed lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process store. Shared by cloning the `Arc` it lives in.
///
/// Can be switched offline to exercise transport failures.
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<HashMap<LearnerId, SessionRecord>>,
    notifier: Notifier,
    available: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            notifier: Notifier::new(256),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulate the store going offline (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Successful upserts so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    fn fetch(&self, learner: &LearnerId) -> Result<Option<SessionRecord>, StoreError> {
        self.check_available()?;
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(learner).cloned())
    }

    fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.check_available()?;
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.learner_id.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notifier.notify(record);
        Ok(())
    }

    fn subscribe(&self, learner: &LearnerId) -> ChangeFeed {
        self.notifier.subscribe(learner)
    }
}

/// SQLite-backed store. Change notifications reach subscribers in the same
/// process; other processes see new records on their next point query.
pub struct SqliteStore {
    db: Mutex<Database>,
    notifier: Notifier,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            notifier: Notifier::new(256),
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SessionStore for SqliteStore {
    fn fetch(&self, learner: &LearnerId) -> Result<Option<SessionRecord>, StoreError> {
        let row = {
            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
            db.load_session(learner.as_str())?
        };
        row.map(|row| serde_json::from_str::<SessionRecord>(&row.record_json))
            .transpose()
            .map_err(StoreError::from)
    }

    fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        {
            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
            db.upsert_session(record.learner_id.as_str(), &json, record.state.updated_at)?;
        }
        self.notifier.notify(record);
        Ok(())
    }

    fn subscribe(&self, learner: &LearnerId) -> ChangeFeed {
        self.notifier.subscribe(learner)
    }
}

/// Shared handle used by contexts.
pub type SharedStore = Arc<dyn SessionStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::Settings;
    use chrono::{TimeZone, Utc};

    fn learner(name: &str) -> LearnerId {
        LearnerId::new(name).unwrap()
    }

    fn record(name: &str, remaining: u64) -> SessionRecord {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let mut state = SessionState::new(Settings::default(), at);
        state.remaining_seconds = remaining;
        SessionRecord::new(learner(name), state)
    }

    #[test]
    fn memory_store_upsert_and_fetch() {
        let store = MemoryStore::new();
        assert!(store.fetch(&learner("ada")).unwrap().is_none());
        store.upsert(&record("ada", 100)).unwrap();
        store.upsert(&record("ada", 90)).unwrap();
        let got = store.fetch(&learner("ada")).unwrap().unwrap();
        assert_eq!(got.state.remaining_seconds, 90);
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn feed_is_keyed_by_learner() {
        let store = MemoryStore::new();
        let mut ada = store.subscribe(&learner("ada"));
        store.upsert(&record("grace", 1)).unwrap();
        store.upsert(&record("ada", 2)).unwrap();
        assert_eq!(ada.try_next().map(|r| r.state.remaining_seconds), Some(2));
        assert!(ada.try_next().is_none());
    }

    #[test]
    fn offline_store_fails_without_side_effects() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe(&learner("ada"));
        store.set_available(false);
        assert!(matches!(
            store.upsert(&record("ada", 5)),
            Err(StoreError::Unavailable(_))
        ));
        assert!(feed.try_next().is_none());
        store.set_available(true);
        assert!(store.fetch(&learner("ada")).unwrap().is_none());
    }

    #[test]
    fn record_wire_format_is_flat() {
        let json = serde_json::to_value(record("ada", 42)).unwrap();
        assert_eq!(json["learnerId"], "ada");
        assert_eq!(json["remainingSeconds"], 42);
        assert!(json.get("state").is_none());
    }

    #[test]
    fn sqlite_store_roundtrip_and_notify() {
        let store = SqliteStore::new(Database::open_memory().unwrap());
        let mut feed = store.subscribe(&learner("ada"));
        store.upsert(&record("ada", 77)).unwrap();
        let fetched = store.fetch(&learner("ada")).unwrap().unwrap();
        assert_eq!(fetched, record("ada", 77));
        assert_eq!(feed.try_next(), Some(record("ada", 77)));
    }
}
