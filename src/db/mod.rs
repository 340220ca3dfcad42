pub mod models;

use rusqlite::{params, Connection, OptionalExtension, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub const SELECTED_CLIENT_KEY: &str = "selected_client";
pub const PREFERENCES_KEY: &str = "preferences";

pub fn session_key(client_id: &str) -> String {
    format!("session_{}", client_id)
}

pub fn conversation_key(session_id: &str) -> String {
    format!("conversation_{}", session_id)
}

/// Durable key/value storage for client-side state.
///
/// Every operation is best-effort: a missing key reads as `None`, and a
/// backend failure is logged rather than returned.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);

    /// Write several entries so a reader sees all of them or none.
    fn set_many(&self, entries: &[(String, String)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    fn remove_many(&self, keys: &[String]) {
        for key in keys {
            self.remove(key);
        }
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(app_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(app_dir).ok();
        let db_path = app_dir.join("portfolio-intel.db");
        let conn = Connection::open(db_path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
    }

    pub fn set_values(&self, entries: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
                params![key, value],
            )?;
        }
        tx.commit()
    }

    pub fn remove_values(&self, keys: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        tx.commit()
    }
}

impl Store for Database {
    fn get(&self, key: &str) -> Option<String> {
        self.get_value(key).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "store read failed");
            None
        })
    }

    fn set(&self, key: &str, value: &str) {
        self.set_many(&[(key.to_string(), value.to_string())]);
    }

    fn remove(&self, key: &str) {
        self.remove_many(&[key.to_string()]);
    }

    fn set_many(&self, entries: &[(String, String)]) {
        if let Err(e) = self.set_values(entries) {
            tracing::warn!(count = entries.len(), error = %e, "store write failed");
        }
    }

    fn remove_many(&self, keys: &[String]) {
        if let Err(e) = self.remove_values(keys) {
            tracing::warn!(?keys, error = %e, "store delete failed");
        }
    }
}

/// Process-local store used when no database can be opened.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values().remove(key);
    }

    fn set_many(&self, entries: &[(String, String)]) {
        let mut values = self.values();
        for (key, value) in entries {
            values.insert(key.clone(), value.clone());
        }
    }

    fn remove_many(&self, keys: &[String]) {
        let mut values = self.values();
        for key in keys {
            values.remove(key);
        }
    }
}

/// Open the on-disk store, falling back to memory if the database is unusable.
pub fn open_store(app_dir: &Path) -> Arc<dyn Store> {
    match Database::new(app_dir) {
        Ok(db) => {
            tracing::debug!(dir = %app_dir.display(), "opened local store");
            Arc::new(db)
        }
        Err(e) => {
            tracing::warn!(
                dir = %app_dir.display(),
                error = %e,
                "local store unavailable, session state will not survive restart"
            );
            Arc::new(MemoryStore::new())
        }
    }
}
