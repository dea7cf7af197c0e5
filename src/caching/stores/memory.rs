//! # In-Memory Cache Store
//!
//! Process-local store over a `DashMap`. Expired entries are dropped on
//! read and swept by a periodic cleanup task so an idle proxy does not
//! accumulate dead bodies.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::debug;

use super::{CacheEntry, CacheStats, CacheStore};
use crate::core::error::ProxyResult;

pub struct MemoryStore {
    entries: Arc<DashMap<String, CacheEntry>>,
    _cleanup_task: tokio::task::JoinHandle<()>,
}

impl MemoryStore {
    pub fn new(cleanup_interval: Duration) -> Self {
        let entries: Arc<DashMap<String, CacheEntry>> = Arc::new(DashMap::new());

        let cleanup_task = {
            let entries = entries.clone();
            tokio::spawn(async move {
                let mut ticker = interval(cleanup_interval);
                loop {
                    ticker.tick().await;
                    let before = entries.len();
                    entries.retain(|_, entry| !entry.is_expired());
                    let removed = before.saturating_sub(entries.len());
                    if removed > 0 {
                        debug!(removed, "swept expired cache entries");
                    }
                }
            })
        };

        Self {
            entries,
            _cleanup_task: cleanup_task,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> ProxyResult<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> ProxyResult<()> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn stats(&self) -> ProxyResult<CacheStats> {
        let mut stats = CacheStats::default();
        for entry in self.entries.iter() {
            if entry.is_expired() {
                continue;
            }
            stats.entries += 1;
            stats.size_bytes += entry.value.len() as u64;
        }
        Ok(stats)
    }

    async fn close(&self) -> ProxyResult<()> {
        self._cleanup_task.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = store();
        cache
            .set("k", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_is_last_writer_wins() {
        let cache = store();
        cache.set("k", b"one", Duration::from_secs(60)).await.unwrap();
        cache.set("k", b"two", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"two".to_vec()));
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_uncounted() {
        let cache = store();
        cache.set("k", b"value", Duration::from_secs(0)).await.unwrap();
        // Zero TTL expires at insertion time.
        assert_eq!(cache.get("k").await.unwrap(), None);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.size_bytes, 0);
    }

    #[tokio::test]
    async fn test_stats_counts_live_entries() {
        let cache = store();
        cache.set("a", b"hello", Duration::from_secs(60)).await.unwrap();
        cache.set("b", b"mundo!", Duration::from_secs(60)).await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.size_bytes, 11);
    }
}
