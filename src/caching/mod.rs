//! # Response Cache
//!
//! Read-through TTL cache for forwarded GET responses. The facade owns an
//! `Arc<dyn CacheStore>` so the forwarder stays agnostic to the backing
//! implementation (memory or sqlite).

pub mod key;
pub mod stores;

pub use key::cache_key;
pub use stores::{CacheStats, CacheStore, MemoryStore, SqliteStore};

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::core::config::{CacheBackend, CacheConfig};
use crate::core::error::ProxyResult;

/// TTL key/value store for previously-forwarded responses.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Build the cache over the configured backend.
    pub fn from_config(config: &CacheConfig) -> ProxyResult<Self> {
        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new(config.cleanup_interval)),
            CacheBackend::Sqlite => Arc::new(SqliteStore::open(&config.db_path)?),
        };
        Ok(Self {
            store,
            default_ttl: config.default_ttl,
        })
    }

    /// Wrap an explicit store (used by tests to isolate instances).
    pub fn with_store(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Fetch cached bytes; absent and expired keys both come back `None`.
    /// Store failures degrade to a miss rather than failing the request.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "cache get failed, treating as miss");
                None
            }
        }
    }

    /// Insert or overwrite. A zero TTL falls back to the default (24 h).
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        if let Err(e) = self.store.set(key, value, ttl).await {
            warn!(error = %e, "cache set failed, entry dropped");
        }
    }

    /// Count and byte total of unexpired entries.
    pub async fn stats(&self) -> CacheStats {
        match self.store.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "cache stats failed");
                CacheStats::default()
            }
        }
    }

    /// Release the underlying storage handle.
    pub async fn close(&self) {
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "cache close failed");
        }
    }
}
