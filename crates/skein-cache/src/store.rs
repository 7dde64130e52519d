//! Cache store with Local (DashMap) and Redis backends.

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cached entry with TTL support (local backend only; Redis expires keys
/// server-side).
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache store shared by readers and writers.
///
/// Entries are superseded only by an explicit invalidation from the entity's
/// writer, never by the reader. Deletions are awaited, not spawned: the write
/// path must not acknowledge success until its invalidations have completed.
#[derive(Clone)]
pub enum CacheStore {
    /// Single-instance: local DashMap only.
    Local(Arc<DashMap<String, CachedEntry>>),

    /// Multi-instance: shared Redis store.
    Redis(Pool),
}

impl CacheStore {
    pub fn new_local() -> Self {
        CacheStore::Local(Arc::new(DashMap::new()))
    }

    pub fn new_redis(pool: Pool) -> Self {
        CacheStore::Redis(pool)
    }

    /// Get a value. Store errors are logged and reported as a miss so the
    /// caller falls through to the source of truth.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        match self {
            CacheStore::Local(map) => {
                if let Some(entry) = map.get(key) {
                    if !entry.is_expired() {
                        tracing::debug!(key = %key, "cache hit");
                        return Some(Arc::clone(&entry.data));
                    }
                    drop(entry);
                    map.remove(key);
                }
                tracing::debug!(key = %key, "cache miss");
                None
            }
            CacheStore::Redis(pool) => match pool.get().await {
                Ok(mut conn) => match conn.get::<_, Option<Vec<u8>>>(key).await {
                    Ok(Some(data)) => {
                        tracing::debug!(key = %key, "cache hit");
                        Some(Arc::new(data))
                    }
                    Ok(None) => {
                        tracing::debug!(key = %key, "cache miss");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "cache GET failed, treating as miss");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "cache store unreachable, treating as miss");
                    None
                }
            },
        }
    }

    /// Store a value with a TTL. Failures are logged; the next reader simply
    /// misses.
    pub async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        match self {
            CacheStore::Local(map) => {
                map.insert(key.to_string(), CachedEntry::new(value, ttl));
            }
            CacheStore::Redis(pool) => match pool.get().await {
                Ok(mut conn) => {
                    if let Err(e) = conn
                        .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                        .await
                    {
                        tracing::warn!(key = %key, error = %e, "cache SET failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cache store unreachable, skipping SET");
                }
            },
        }
    }

    /// Delete a single key. Completes before returning; a failure is a logged
    /// no-op and never fails the caller's write.
    pub async fn delete(&self, key: &str) {
        match self {
            CacheStore::Local(map) => {
                map.remove(key);
                tracing::debug!(key = %key, "cache invalidated");
            }
            CacheStore::Redis(pool) => match pool.get().await {
                Ok(mut conn) => {
                    if let Err(e) = conn.del::<_, ()>(key).await {
                        tracing::warn!(key = %key, error = %e, "cache DEL failed");
                    } else {
                        tracing::debug!(key = %key, "cache invalidated");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cache store unreachable, skipping invalidation");
                }
            },
        }
    }

    /// Delete every key under a prefix (the list-key family of an entity).
    ///
    /// Not atomic with respect to `delete`: a racing reader can repopulate a
    /// list key between the two calls. The short list TTL bounds that window.
    pub async fn delete_prefix(&self, prefix: &str) {
        match self {
            CacheStore::Local(map) => {
                map.retain(|k, _| !k.starts_with(prefix));
                tracing::debug!(prefix = %prefix, "cache prefix invalidated");
            }
            CacheStore::Redis(pool) => {
                let mut conn = match pool.get().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "cache store unreachable, skipping prefix invalidation");
                        return;
                    }
                };
                let pattern = format!("{prefix}*");
                let mut cursor: u64 = 0;
                loop {
                    let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn)
                        .await;
                    let (next, keys) = match scanned {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(prefix = %prefix, error = %e, "cache SCAN failed");
                            return;
                        }
                    };
                    if !keys.is_empty() {
                        if let Err(e) = conn.del::<_, ()>(&keys).await {
                            tracing::warn!(prefix = %prefix, error = %e, "cache DEL failed");
                        }
                    }
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                tracing::debug!(prefix = %prefix, "cache prefix invalidated");
            }
        }
    }

    /// Write-path invalidation: drop an entity's detail key and every key in
    /// its list family, in that order. Both complete before this returns, so
    /// the caller can respond knowing the cache holds no pre-write state.
    pub async fn invalidate_entity(&self, entity_key: &str, list_prefix: &str) {
        self.delete(entity_key).await;
        self.delete_prefix(list_prefix).await;
    }

    /// Get and deserialize a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.get(key).await?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                // A corrupt entry is dropped so the next read repopulates it.
                tracing::warn!(key = %key, error = %e, "failed to deserialize cached value");
                self.delete(key).await;
                None
            }
        }
    }

    /// Serialize and store a JSON value with a TTL.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(value) {
            Ok(data) => self.set_with_ttl(key, data, ttl).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to serialize value for cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store = CacheStore::new_local();
        store
            .set_with_ttl("post:p1", b"hello".to_vec(), Duration::from_secs(60))
            .await;
        assert_eq!(store.get("post:p1").await.as_deref(), Some(&b"hello".to_vec()));

        store.delete("post:p1").await;
        assert!(store.get("post:p1").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let store = CacheStore::new_local();
        store
            .set_with_ttl("post:p1", b"x".to_vec(), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("post:p1").await.is_none());
    }

    #[tokio::test]
    async fn delete_prefix_removes_only_the_family() {
        let store = CacheStore::new_local();
        let ttl = Duration::from_secs(60);
        store.set_with_ttl("posts:1:10", b"a".to_vec(), ttl).await;
        store.set_with_ttl("posts:2:10", b"b".to_vec(), ttl).await;
        store.set_with_ttl("post:p1", b"c".to_vec(), ttl).await;

        store.delete_prefix("posts:").await;

        assert!(store.get("posts:1:10").await.is_none());
        assert!(store.get("posts:2:10").await.is_none());
        assert!(store.get("post:p1").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_entity_clears_detail_and_lists() {
        let store = CacheStore::new_local();
        let ttl = Duration::from_secs(60);
        store.set_with_ttl("post:p1", b"a".to_vec(), ttl).await;
        store.set_with_ttl("post:p2", b"b".to_vec(), ttl).await;
        store.set_with_ttl("posts:1:10", b"c".to_vec(), ttl).await;

        store.invalidate_entity("post:p1", "posts:").await;

        assert!(store.get("post:p1").await.is_none());
        assert!(store.get("posts:1:10").await.is_none());
        // unrelated entities are untouched
        assert!(store.get("post:p2").await.is_some());
    }

    #[tokio::test]
    async fn json_helpers_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Page {
            total: usize,
        }
        let store = CacheStore::new_local();
        store
            .set_json("posts:1:10", &Page { total: 3 }, Duration::from_secs(60))
            .await;
        assert_eq!(
            store.get_json::<Page>("posts:1:10").await,
            Some(Page { total: 3 })
        );
    }

    #[tokio::test]
    async fn corrupt_json_entry_is_dropped() {
        let store = CacheStore::new_local();
        store
            .set_with_ttl("post:p1", b"not json".to_vec(), Duration::from_secs(60))
            .await;
        assert!(store.get_json::<serde_json::Value>("post:p1").await.is_none());
        // the corrupt bytes were evicted
        assert!(store.get("post:p1").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_redis_is_a_miss_and_a_noop() {
        // Pool creation is lazy; the connection attempt fails on first use.
        let cfg = deadpool_redis::Config::from_url("redis://127.0.0.1:1");
        let pool = cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .unwrap();
        let store = CacheStore::new_redis(pool);

        assert!(store.get("post:p1").await.is_none());
        // must not panic or error
        store.delete("post:p1").await;
        store.delete_prefix("posts:").await;
    }
}
