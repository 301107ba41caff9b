//! Cache layers
//!
//! `SharedCache` is the cluster-visible cache/lock store (preset lists, wallet
//! and user snapshots, distributed locks). `LocalCache` is a bounded
//! process-local LRU in front of it.

use crate::errors::{EngineResult, StorageError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait SharedCache: Send + Sync {
    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> EngineResult<()>;

    /// Store only if the key is absent or expired; returns whether it was stored
    fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> EngineResult<bool>;

    fn delete(&self, key: &str) -> EngineResult<()>;

    /// Delete only if the current value equals `expected`
    fn delete_if_eq(&self, key: &str, expected: &[u8]) -> EngineResult<bool>;
}

pub fn get_json<T: DeserializeOwned>(cache: &dyn SharedCache, key: &str) -> EngineResult<Option<T>> {
    match cache.get(key)? {
        Some(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // A stale or foreign entry is a miss, not an error
                tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
                cache.delete(key)?;
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(
    cache: &dyn SharedCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> EngineResult<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode cache entry: {}", e)))?;
    cache.set(key, bytes, ttl)
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process `SharedCache` for single-node deployments and tests
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedCache for MemoryCache {
    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        Ok(hit)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> EngineResult<()> {
        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> EngineResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(CacheEntry::new(value, ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value, ttl));
                Ok(true)
            }
        }
    }

    fn delete(&self, key: &str) -> EngineResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn delete_if_eq(&self, key: &str, expected: &[u8]) -> EngineResult<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.value == expected)
            .is_some();
        Ok(removed)
    }
}

/// Bounded process-local LRU
pub struct LocalCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> LocalCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.put(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_nx_respects_live_entries() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("lock:a", b"t1".to_vec(), None).unwrap());
        assert!(!cache.set_nx("lock:a", b"t2".to_vec(), None).unwrap());
        assert_eq!(cache.get("lock:a").unwrap(), Some(b"t1".to_vec()));
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(0)))
            .unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(cache.set_nx("k", b"w".to_vec(), None).unwrap());
        assert_eq!(cache.get("k").unwrap(), Some(b"w".to_vec()));
    }

    #[test]
    fn test_delete_if_eq() {
        let cache = MemoryCache::new();
        cache.set("k", b"mine".to_vec(), None).unwrap();
        assert!(!cache.delete_if_eq("k", b"other").unwrap());
        assert!(cache.delete_if_eq("k", b"mine").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn test_json_helpers() {
        let cache = MemoryCache::new();
        set_json(&cache, "list", &vec![3u8, 1, 4], None).unwrap();
        let list: Option<Vec<u8>> = get_json(&cache, "list").unwrap();
        assert_eq!(list, Some(vec![3, 1, 4]));

        cache.set("bad", b"not json".to_vec(), None).unwrap();
        let bad: Option<Vec<u8>> = get_json(&cache, "bad").unwrap();
        assert!(bad.is_none());
        assert_eq!(cache.get("bad").unwrap(), None);
    }

    #[test]
    fn test_local_cache_evicts_lru() {
        let cache: LocalCache<&str, u32> = LocalCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.len(), 2);
    }
}
