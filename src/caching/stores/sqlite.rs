//! # Sqlite Cache Store
//!
//! Durable embedded store: one `cache` table keyed by the opaque cache key
//! with raw bytes and an absolute expiry, plus an index on `expires_at` for
//! the bulk expiry queries behind `stats`. Expiry is enforced in the reads
//! (`expires_at > now`), so stale rows are simply invisible until the next
//! overwrite or vacuum.
//!
//! rusqlite connections are blocking; every call hops through
//! `spawn_blocking` so the request tasks never stall the runtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{unix_now, CacheStats, CacheStore};
use crate::core::error::{ProxyError, ProxyResult};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database and ensure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> ProxyResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ProxyError::cache(format!("open {:?}: {e}", path.as_ref())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ProxyError::cache(format!("set WAL: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value BLOB,
                expires_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_expires ON cache(expires_at);",
        )
        .map_err(|e| ProxyError::cache(format!("create schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> ProxyResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| ProxyError::cache(format!("store task panicked: {e}")))?
        .map_err(|e| ProxyError::cache(e.to_string()))
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> ProxyResult<Option<Vec<u8>>> {
        let key = key.to_string();
        let now = unix_now() as i64;
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> ProxyResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        let expires_at = (unix_now() + ttl.as_secs()) as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn stats(&self) -> ProxyResult<CacheStats> {
        let now = unix_now() as i64;
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0)
                 FROM cache WHERE expires_at > ?1",
                params![now],
                |row| {
                    Ok(CacheStats {
                        entries: row.get::<_, i64>(0)? as usize,
                        size_bytes: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
        })
        .await
    }

    async fn close(&self) -> ProxyResult<()> {
        // Dropping the last Arc closes the connection; flush WAL eagerly so
        // a clean shutdown leaves no sidecar files behind.
        self.with_conn(|conn| {
            conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")
                .or(Ok(()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("cache.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let (_dir, store) = open_temp();
        store
            .set("k", br#"{"status":"ok"}"#, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(
            store.get("k").await.unwrap(),
            Some(br#"{"status":"ok"}"#.to_vec())
        );
        assert_eq!(store.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_rows_are_invisible() {
        let (_dir, store) = open_temp();
        store.set("k", b"v", Duration::from_secs(0)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats, CacheStats::default());
    }

    #[tokio::test]
    async fn test_stats_counts_and_sizes() {
        let (_dir, store) = open_temp();
        let empty = store.stats().await.unwrap();
        assert_eq!(empty.entries, 0);
        assert_eq!(empty.size_bytes, 0);

        store.set("a", b"hello", Duration::from_secs(60)).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size_bytes, 5);
    }

    #[tokio::test]
    async fn test_replace_overwrites_in_place() {
        let (_dir, store) = open_temp();
        store.set("k", b"one", Duration::from_secs(60)).await.unwrap();
        store.set("k", b"dos!", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"dos!".to_vec()));
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.size_bytes, 4);
    }
}
