//! Storage collaborators: the object store holding extraction results, page
//! text and images, and the key/value cache holding succeeded task results.
//!
//! Both are traits injected into the engine; nothing here is global.

pub mod fs;
pub mod memory;
pub mod sqlite_cache;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::db::DatabaseError;

pub use fs::FsObjectStore;
pub use memory::{MemoryCacheStore, MemoryObjectStore};
pub use sqlite_cache::SqliteCacheStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object URI: {0}")]
    InvalidUri(String),

    #[error("I/O error on {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object {0} is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// Object store
// ═══════════════════════════════════════════════════════════

/// Blob store addressed by URI.
pub trait ObjectStore: Send + Sync {
    fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, StoreError>;

    fn put_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn get_text(&self, uri: &str) -> Result<String, StoreError> {
        String::from_utf8(self.get_bytes(uri)?).map_err(|_| StoreError::InvalidUtf8(uri.to_string()))
    }

    fn get_json(&self, uri: &str) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::from_slice(&self.get_bytes(uri)?)?)
    }

    fn write_json(&self, uri: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        self.put_bytes(uri, &serde_json::to_vec(value)?)
    }
}

// ═══════════════════════════════════════════════════════════
// Cache store
// ═══════════════════════════════════════════════════════════

/// Key/value store with per-entry expiry. Expired entries read as absent.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite `key`.
    fn put(&self, key: &str, payload: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// The configured cache store, selected once at startup.
pub enum CacheBackend {
    Sqlite(SqliteCacheStore),
    Memory(MemoryCacheStore),
    /// Every read misses, every write is dropped.
    Disabled,
}

impl CacheBackend {
    pub fn from_config(config: &CacheConfig) -> Result<Self, StoreError> {
        match config.backend {
            CacheBackendKind::Sqlite => {
                let path = config.resolved_path();
                tracing::info!(path = %path.display(), "Opening SQLite task cache");
                Ok(Self::Sqlite(SqliteCacheStore::open(&path)?))
            }
            CacheBackendKind::Memory => Ok(Self::Memory(MemoryCacheStore::new())),
            CacheBackendKind::Disabled => {
                tracing::info!("Task cache disabled");
                Ok(Self::Disabled)
            }
        }
    }
}

impl CacheStore for CacheBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Sqlite(store) => store.get(key),
            Self::Memory(store) => store.get(key),
            Self::Disabled => Ok(None),
        }
    }

    fn put(&self, key: &str, payload: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        match self {
            Self::Sqlite(store) => store.put(key, payload, expires_at),
            Self::Memory(store) => store.put(key, payload, expires_at),
            Self::Disabled => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_backend_always_misses() {
        let config = CacheConfig {
            backend: CacheBackendKind::Disabled,
            ..CacheConfig::default()
        };
        let cache = CacheBackend::from_config(&config).unwrap();
        cache.put("k", "v", Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn memory_backend_round_trips() {
        let config = CacheConfig {
            backend: CacheBackendKind::Memory,
            ..CacheConfig::default()
        };
        let cache = CacheBackend::from_config(&config).unwrap();
        cache.put("k", "v", Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn sqlite_backend_opens_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackendKind::Sqlite,
            path: Some(dir.path().join("nested").join("cache.db")),
            ttl_hours: 24,
        };
        let cache = CacheBackend::from_config(&config).unwrap();
        assert!(matches!(cache, CacheBackend::Sqlite(_)));
        assert!(dir.path().join("nested").join("cache.db").exists());
    }

    #[test]
    fn default_text_and_json_helpers() {
        let store = MemoryObjectStore::new();
        store.put_bytes("a.json", br#"{"x": 1}"#).unwrap();
        assert_eq!(store.get_text("a.json").unwrap(), r#"{"x": 1}"#);
        assert_eq!(store.get_json("a.json").unwrap()["x"], 1);

        store.put_bytes("bin", &[0xFF, 0xFE]).unwrap();
        assert!(matches!(store.get_text("bin"), Err(StoreError::InvalidUtf8(_))));
    }
}
