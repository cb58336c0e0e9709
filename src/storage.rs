//! SQLite-backed snapshot store for monitor state.
//!
//! The store is a small keyed blob/JSON table: alert snapshots, lifetime
//! digest checkpoints, and the last-generated report land here so a
//! restart picks up long-horizon state. Corrupt values are treated as
//! absent, never fatal.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Snapshot store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Well-known snapshot keys.
pub mod keys {
    pub const ALERTS: &str = "alerts_snapshot";
    pub const LIFETIME_DIGESTS: &str = "lifetime_digests";
}

/// Thread-safe snapshot store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory store, for tests and ephemeral runs.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )?;
        Ok(())
    }

    /// Store a JSON-serializable value under a key.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec(value)?;
        self.put_blob(key, &data)
    }

    /// Load a JSON value. A missing or corrupt value reads as None.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(data) = self.get_blob(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("Store: discarding corrupt snapshot '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    /// Store a raw blob under a key.
    pub fn put_blob(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO snapshots (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
            params![key, data],
        )?;
        Ok(())
    }

    /// Load a raw blob, if present.
    pub fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM snapshots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Remove a snapshot.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM snapshots WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_blob_roundtrip_and_overwrite() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        assert!(store.get_blob("digests").unwrap().is_none());
        store.put_blob("digests", &[1, 2, 3]).unwrap();
        assert_eq!(store.get_blob("digests").unwrap().unwrap(), vec![1, 2, 3]);

        store.put_blob("digests", &[9]).unwrap();
        assert_eq!(store.get_blob("digests").unwrap().unwrap(), vec![9]);

        store.delete("digests").unwrap();
        assert!(store.get_blob("digests").unwrap().is_none());
    }

    #[test]
    fn test_json_roundtrip() {
        let store = Store::in_memory().unwrap();
        store
            .put_json("config", &serde_json::json!({"sample_rate": 0.25}))
            .unwrap();
        let back: serde_json::Value = store.get_json("config").unwrap().unwrap();
        assert_eq!(back["sample_rate"], 0.25);
    }

    #[test]
    fn test_corrupt_json_reads_as_none() {
        let store = Store::in_memory().unwrap();
        store.put_blob("alerts_snapshot", b"not json at all").unwrap();
        let back: Option<serde_json::Value> = store.get_json("alerts_snapshot").unwrap();
        assert!(back.is_none());
    }
}
