use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{CacheStore, StoreError};
use crate::db::{self, task_cache};

/// Expired rows are swept once every this many writes.
const PURGE_EVERY_PUTS: u64 = 256;

/// Task cache persisted in the `task_cache` SQLite table.
///
/// Reads never return expired rows. Storage is reclaimed when the store is
/// opened and periodically while writing.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
    puts: AtomicU64,
}

impl SqliteCacheStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self::from_connection(db::open_database(path)?);
        if let Err(e) = store.purge_expired() {
            tracing::warn!(path = %path.display(), error = %e, "Task cache purge failed");
        }
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(db::open_memory_database()?))
    }

    /// Wrap an already-migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            puts: AtomicU64::new(0),
        }
    }

    /// Delete expired rows, returning how many were removed.
    pub fn purge_expired(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let removed = task_cache::delete_expired_rows(&conn, Utc::now())?;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired task cache rows");
        }
        Ok(removed)
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(task_cache::get_live_cache_row(&conn, key, Utc::now())?.map(|row| row.payload))
    }

    fn put(&self, key: &str, payload: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        task_cache::upsert_cache_row(
            &conn,
            &task_cache::CacheRow {
                cache_key: key.to_string(),
                payload: payload.to_string(),
                created_at: Utc::now(),
                expires_at,
            },
        )?;
        drop(conn);

        if (self.puts.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_EVERY_PUTS == 0 {
            if let Err(e) = self.purge_expired() {
                tracing::warn!(error = %e, "Task cache purge failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn put_then_get() {
        let store = SqliteCacheStore::in_memory().unwrap();
        store.put("k", "[1]", Utc::now() + Duration::hours(24)).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn put_overwrites_existing_key() {
        let store = SqliteCacheStore::in_memory().unwrap();
        let expiry = Utc::now() + Duration::hours(1);
        store.put("k", "first", expiry).unwrap();
        store.put("k", "second", expiry).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn purge_removes_only_expired() {
        let store = SqliteCacheStore::in_memory().unwrap();
        store.put("old", "x", Utc::now() - Duration::minutes(5)).unwrap();
        store.put("live", "y", Utc::now() + Duration::hours(1)).unwrap();
        assert_eq!(store.get("old").unwrap(), None, "expired rows never read back");
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.get("live").unwrap().as_deref(), Some("y"));
    }

    #[test]
    fn reopening_reclaims_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteCacheStore::open(&path).unwrap();
            store.put("stale", "x", Utc::now() - Duration::minutes(1)).unwrap();
            store.put("live", "y", Utc::now() + Duration::hours(1)).unwrap();
        }
        let store = SqliteCacheStore::open(&path).unwrap();
        assert_eq!(row_count(&store), 1, "expired row deleted on open");
        assert_eq!(store.get("live").unwrap().as_deref(), Some("y"));
    }

    #[test]
    fn writes_periodically_reclaim_expired_rows() {
        let store = SqliteCacheStore::in_memory().unwrap();
        store.put("stale", "x", Utc::now() - Duration::minutes(1)).unwrap();
        let live = Utc::now() + Duration::hours(1);
        for i in 1..PURGE_EVERY_PUTS - 1 {
            store.put(&format!("k{i}"), "v", live).unwrap();
        }
        assert_eq!(row_count(&store), PURGE_EVERY_PUTS as usize - 1);

        store.put("last", "v", live).unwrap();
        assert_eq!(row_count(&store), PURGE_EVERY_PUTS as usize - 1, "stale row swept, last row added");
        assert_eq!(store.get("stale").unwrap(), None);
    }

    fn row_count(store: &SqliteCacheStore) -> usize {
        let conn = store.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM task_cache", [], |row| row.get::<_, i64>(0))
            .unwrap() as usize
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteCacheStore::open(&path).unwrap();
            store.put("k", "v", Utc::now() + Duration::hours(1)).unwrap();
        }
        let store = SqliteCacheStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
