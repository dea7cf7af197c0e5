//! # Cache Stores Module
//!
//! Pluggable backing stores for the response cache. The forwarder only ever
//! talks to the [`CacheStore`] trait; whether entries live in a DashMap or
//! in an embedded sqlite file is a deployment detail.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::error::ProxyResult;

/// A cached response body with its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Raw response bytes.
    pub value: Vec<u8>,

    /// Unix timestamp (seconds) after which the entry is invisible.
    pub expires_at: u64,
}

impl CacheEntry {
    pub fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: unix_now() + ttl.as_secs(),
        }
    }

    /// An entry is visible iff `now < expires_at`.
    pub fn is_expired(&self) -> bool {
        unix_now() >= self.expires_at
    }
}

/// Count and byte total of unexpired entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: u64,
}

/// Contract every backing store must satisfy. TTL semantics are identical
/// across implementations: an expired entry is treated as absent and is
/// excluded from stats.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch an unexpired entry's bytes, `None` for absent or expired keys.
    async fn get(&self, key: &str) -> ProxyResult<Option<Vec<u8>>>;

    /// Insert or overwrite. Last-writer-wins, no versioning.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> ProxyResult<()>;

    /// Count and byte total of unexpired entries.
    async fn stats(&self) -> ProxyResult<CacheStats>;

    /// Release any underlying storage handle.
    async fn close(&self) -> ProxyResult<()>;
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
