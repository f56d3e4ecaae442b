use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::progress::SessionSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt session snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// A saved snapshot and when it was written
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSession {
    pub snapshot: SessionSnapshot,
    pub saved_at: DateTime<Utc>,
}

/// The SessionStore keeps follow-session snapshots in SQLite.
/// One row per tour name, so resuming a tour picks up where it was left.
pub struct SessionStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl SessionStore {
    /// Open (or create) the store at `db_path`
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        tracing::debug!("session database opened at {}", db_path.display());

        let store = SessionStore {
            conn,
            db_path: Some(db_path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// A throwaway store, used by tests and one-off runs
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = SessionStore {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                tour_name       TEXT PRIMARY KEY,
                snapshot_json   TEXT NOT NULL,
                saved_at        INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Path of the database file, None for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Save (or replace) the snapshot for a tour
    pub fn save(&self, tour_name: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let json = snapshot.to_json()?;
        self.conn.execute(
            "INSERT INTO sessions (tour_name, snapshot_json, saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(tour_name) DO UPDATE SET
                snapshot_json = excluded.snapshot_json,
                saved_at = excluded.saved_at",
            params![tour_name, json, Utc::now().timestamp()],
        )?;
        tracing::debug!(tour = tour_name, visited = snapshot.visited_item_ids.len(), "saved session");
        Ok(())
    }

    /// Load the snapshot saved for a tour, if any
    pub fn load(&self, tour_name: &str) -> Result<Option<SavedSession>, StoreError> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT snapshot_json, saved_at FROM sessions WHERE tour_name = ?1",
                params![tour_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((json, saved_at)) = row else {
            return Ok(None);
        };

        let snapshot = SessionSnapshot::from_json(&json)?;
        let saved_at = Utc
            .timestamp_opt(saved_at, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(Some(SavedSession { snapshot, saved_at }))
    }

    /// Forget the session for a tour. Returns whether one existed.
    pub fn clear(&self, tour_name: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE tour_name = ?1", params![tour_name])?;
        Ok(removed > 0)
    }

    /// Names of all tours with a saved session
    pub fn tour_names(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT tour_name FROM sessions ORDER BY tour_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Position;
    use crate::state::data::ItemId;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            visited_item_ids: vec![ItemId(0), ItemId(2)],
            current_item_id: Some(ItemId(2)),
            last_position: Some(Position::new(40.0, -75.0)),
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = SessionStore::in_memory().unwrap();
        assert!(store.load("Garden").unwrap().is_none());

        store.save("Garden", &snapshot()).unwrap();
        let saved = store.load("Garden").unwrap().unwrap();
        assert_eq!(saved.snapshot, snapshot());
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let store = SessionStore::in_memory().unwrap();
        store.save("Garden", &snapshot()).unwrap();
        store.save("Garden", &SessionSnapshot::default()).unwrap();

        let saved = store.load("Garden").unwrap().unwrap();
        assert_eq!(saved.snapshot, SessionSnapshot::default());
        assert_eq!(store.tour_names().unwrap(), vec!["Garden".to_string()]);
    }

    #[test]
    fn test_clear() {
        let store = SessionStore::in_memory().unwrap();
        store.save("Garden", &snapshot()).unwrap();
        assert!(store.clear("Garden").unwrap());
        assert!(!store.clear("Garden").unwrap());
        assert!(store.load("Garden").unwrap().is_none());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("sessions.db");

        {
            let store = SessionStore::open(&path).unwrap();
            store.save("Zoo", &snapshot()).unwrap();
        }

        let store = SessionStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.load("Zoo").unwrap().unwrap().snapshot, snapshot());
    }
}
