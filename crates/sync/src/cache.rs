//! Durable on-device cache of whole collections (SQLite).
//!
//! Each collection is stored as one JSON document under a fixed key
//! (`smartmaint_products`, ...). Reads and writes are synchronous and never
//! touch the network.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("failed to serialize value for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache connection lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Location(#[from] anyhow::Error),
}

/// SQLite-backed cache handle.
///
/// Cheap to clone; clones share one connection.
#[derive(Debug, Clone)]
pub struct LocalCache {
    conn: Arc<Mutex<Connection>>,
}

impl LocalCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache directory at {parent:?}"))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache database at {path:?}"))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(?path, journal_mode = %mode, "opened local cache");

        Self::from_connection(conn)
    }

    /// Throwaway cache, mostly for tests.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                key        TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Read the value stored under `key`.
    ///
    /// A missing key is seeded with `default` (persisted) and returned. A
    /// stored value that no longer parses is replaced by `default` too.
    pub fn load<T>(&self, key: &str, default: T) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
    {
        let raw = self.read_raw(key)?;

        match raw {
            Some(raw) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => Ok(value),
                Err(err) => {
                    tracing::warn!(key, error = %err, "cached value is malformed; resetting to default");
                    self.save(key, &default)?;
                    Ok(default)
                }
            },
            None => {
                tracing::debug!(key, "cache miss; persisting default");
                self.save(key, &default)?;
                Ok(default)
            }
        }
    }

    /// Read `key` without seeding. `None` when absent or malformed.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        Ok(self
            .read_raw(key)?
            .and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    /// Persist `value` under `key`, replacing whatever was there.
    ///
    /// If serialization fails nothing is written.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_string(value).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;

        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO collections (key, data, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![key, data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.read_raw(key)?.is_some())
    }

    /// Drop `key`. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let conn = self.connection()?;
        let n = conn.execute("DELETE FROM collections WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    fn read_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let conn = self.connection()?;
        let raw = conn
            .query_row("SELECT data FROM collections WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(raw)
    }

    #[cfg(test)]
    pub(crate) fn write_raw(&self, key: &str, data: &str) -> Result<(), CacheError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO collections (key, data, updated_at) VALUES (?1, ?2, ?3)",
            params![key, data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
