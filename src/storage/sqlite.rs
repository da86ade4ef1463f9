//! SQLite document store.
//!
//! All collections share one `documents` table keyed by
//! `(collection, key)`, with the JSON body stored as text.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{Collection, StorageBackend, StorageError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    key        TEXT NOT NULL,
    body       TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);
";

/// Durable backend over a single SQLite database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path` and apply the schema
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database (used by tests)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StorageBackend for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<(), StorageError> {
        let body = serde_json::to_string(value)?;
        self.conn.lock().execute(
            "INSERT INTO documents(collection, key, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, key) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
            params![collection.as_str(), key, body, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StorageError> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|body| serde_json::from_str(&body).map_err(StorageError::from))
            .transpose()
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM documents WHERE collection = ?1 AND key = ?2",
            params![collection.as_str(), key],
        )?;
        Ok(removed > 0)
    }

    fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key, body FROM documents WHERE collection = ?1 ORDER BY key")?;

        let rows = stmt.query_map(params![collection.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (key, body) = row?;
            documents.push((key, serde_json::from_str(&body)?));
        }
        Ok(documents)
    }
}
