//! Reference-counted cache of open database handles.
//!
//! Connections are shared across every session whose configuration is
//! identical; the last release closes the handle, running `PRAGMA optimize`
//! first for writable databases.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Server-side connection configuration. Also the pool's sharing key: two
/// sessions with equal configs observe the same underlying connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default)]
    pub readonly: bool,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>, readonly: bool) -> Self {
        Self {
            path: path.into(),
            readonly,
        }
    }

    fn cache_key(&self) -> String {
        serde_json::to_string(self).expect("config serialization should not fail")
    }
}

/// A pooled database handle. The engine-level mutex is part of the resource:
/// the protocol layer does not serialize statement execution across
/// connections beyond it.
pub type SharedConnection = Arc<Mutex<Connection>>;

struct PoolEntry {
    refcount: usize,
    conn: SharedConnection,
}

/// Process-wide pool of refcounted connections keyed by configuration.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    entries: Arc<Mutex<HashMap<String, PoolEntry>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open or share the connection for `config`. A fresh entry starts with
    /// refcount 1; an existing one is bumped and the same `Arc` returned.
    /// Open failures cache nothing.
    pub fn acquire(&self, config: &DatabaseConfig) -> Result<SharedConnection> {
        let mut entries = self.entries.lock();
        let key = config.cache_key();

        if let Some(entry) = entries.get_mut(&key) {
            entry.refcount += 1;
            return Ok(entry.conn.clone());
        }

        let conn = if config.readonly {
            Connection::open_with_flags(&config.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?
        } else {
            Connection::open(&config.path)?
        };
        let conn = Arc::new(Mutex::new(conn));
        entries.insert(
            key,
            PoolEntry {
                refcount: 1,
                conn: conn.clone(),
            },
        );
        Ok(conn)
    }

    /// Drop one reference to the connection for `config`. The release that
    /// brings the count to zero discards the entry, running the maintenance
    /// step first when the database is writable.
    ///
    /// # Panics
    ///
    /// Releasing a configuration that was never acquired is a programming
    /// error and panics.
    pub fn release(&self, config: &DatabaseConfig) {
        let mut entries = self.entries.lock();
        let key = config.cache_key();

        let entry = entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("released a connection that was never acquired: {key}"));
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return;
        }

        let entry = entries.remove(&key).expect("entry exists");
        if !config.readonly {
            if let Err(err) = entry.conn.lock().execute_batch("PRAGMA optimize;") {
                tracing::warn!(error = %err, path = %config.path, "maintenance step failed on release");
            }
        }
        tracing::debug!(path = %config.path, "closed pooled connection");
        // The rusqlite handle closes when the final Arc clone drops; callers
        // racing teardown keep it alive only until their own clone goes away.
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config(dir: &TempDir, readonly: bool) -> DatabaseConfig {
        let path = dir.path().join("pool.sqlite3");
        // Make sure the file exists so readonly opens succeed.
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE IF NOT EXISTS t (id INTEGER)")
            .unwrap();
        DatabaseConfig::new(path.to_string_lossy(), readonly)
    }

    #[test]
    fn test_acquire_shares_one_connection() {
        let dir = TempDir::new().unwrap();
        let config = temp_config(&dir, false);
        let pool = ConnectionPool::new();

        let first = pool.acquire(&config).unwrap();
        let second = pool.acquire(&config).unwrap();
        let third = pool.acquire(&config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(pool.len(), 1);

        pool.release(&config);
        pool.release(&config);
        assert_eq!(pool.len(), 1, "intermediate releases must not close");

        pool.release(&config);
        assert!(pool.is_empty(), "final release closes exactly once");
    }

    #[test]
    fn test_distinct_configs_get_distinct_entries() {
        let dir = TempDir::new().unwrap();
        let writable = temp_config(&dir, false);
        let readonly = DatabaseConfig::new(writable.path.clone(), true);
        let pool = ConnectionPool::new();

        let a = pool.acquire(&writable).unwrap();
        let b = pool.acquire(&readonly).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);

        pool.release(&writable);
        pool.release(&readonly);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_readonly_release_skips_maintenance() {
        // PRAGMA optimize may write; on a read-only handle the maintenance
        // step must not run at all, so the release succeeds quietly.
        let dir = TempDir::new().unwrap();
        let config = temp_config(&dir, true);
        let pool = ConnectionPool::new();

        pool.acquire(&config).unwrap();
        pool.release(&config);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_open_failure_caches_nothing() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(
            dir.path().join("missing.sqlite3").to_string_lossy(),
            true,
        );
        let pool = ConnectionPool::new();

        assert!(pool.acquire(&config).is_err());
        assert!(pool.is_empty());
    }

    #[test]
    #[should_panic(expected = "never acquired")]
    fn test_release_of_unknown_key_panics() {
        let pool = ConnectionPool::new();
        pool.release(&DatabaseConfig::new("nowhere.sqlite3", false));
    }
}
