//! SQLite-based storage.
//!
//! Provides persistent storage for:
//! - Timer session records, one per learner (the durable store)
//! - Key-value store for local-only state such as unauthenticated settings

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use crate::error::{CoreError, DatabaseError};

/// Stored session row: the serialized record and its `updated_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub learner_id: String,
    pub record_json: String,
    pub updated_at: DateTime<Utc>,
}

/// SQLite database for timer sessions and local key-value state.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/homeroom/homeroom.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("homeroom.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS timer_sessions (
                    learner_id  TEXT PRIMARY KEY,
                    record      TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS kv (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_timer_sessions_updated_at ON timer_sessions(updated_at);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Insert or replace the session record for a learner.
    pub fn upsert_session(
        &self,
        learner_id: &str,
        record_json: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO timer_sessions (learner_id, record, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(learner_id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
            params![learner_id, record_json, updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Point query for one learner's session record.
    pub fn load_session(&self, learner_id: &str) -> Result<Option<SessionRow>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT learner_id, record, updated_at FROM timer_sessions WHERE learner_id = ?1",
                params![learner_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(learner_id, record_json, updated_at)| {
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| DatabaseError::QueryFailed(format!("invalid updated_at: {e}")))?
                .with_timezone(&Utc);
            Ok(SessionRow {
                learner_id,
                record_json,
                updated_at,
            })
        })
        .transpose()
    }

    /// Learner ids with a stored session, most recently updated first.
    pub fn list_learners(&self) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT learner_id FROM timer_sessions ORDER BY updated_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut learners = Vec::new();
        for row in rows {
            learners.push(row?);
        }
        Ok(learners)
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn upsert_and_load_session() {
        let db = Database::open_memory().unwrap();
        assert!(db.load_session("ada").unwrap().is_none());

        db.upsert_session("ada", r#"{"v":1}"#, t0()).unwrap();
        db.upsert_session("ada", r#"{"v":2}"#, t0() + Duration::seconds(5))
            .unwrap();

        let row = db.load_session("ada").unwrap().unwrap();
        assert_eq!(row.record_json, r#"{"v":2}"#);
        assert_eq!(row.updated_at, t0() + Duration::seconds(5));
    }

    #[test]
    fn learners_listed_newest_first() {
        let db = Database::open_memory().unwrap();
        db.upsert_session("ada", "{}", t0()).unwrap();
        db.upsert_session("grace", "{}", t0() + Duration::seconds(1))
            .unwrap();
        assert_eq!(db.list_learners().unwrap(), vec!["grace", "ada"]);
    }

    #[test]
    fn kv_roundtrip() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.kv_get("missing").unwrap(), None);
        db.kv_set("k", "v1").unwrap();
        db.kv_set("k", "v2").unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homeroom.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.kv_set("k", "kept").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("kept"));
    }
}
