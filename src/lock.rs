//! Scoped distributed locks
//!
//! A lock is a `set_nx` of a random token with a TTL in the shared cache.
//! The guard releases it on drop with a compare-and-delete so an expired and
//! re-acquired lock is never released by its previous owner.

use crate::cache::SharedCache;
use crate::errors::{EngineResult, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Wait until `key` is held by this caller; fails with `LockTimeout`
    async fn acquire(&self, key: &str) -> EngineResult<LockGuard>;
}

/// Held lock; released when dropped
pub struct LockGuard {
    cache: Arc<dyn SharedCache>,
    key: String,
    token: Vec<u8>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match self.cache.delete_if_eq(&self.key, &self.token) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(key = %self.key, "Lock expired before release"),
            Err(e) => tracing::error!(key = %self.key, error = %e, "Failed to release lock"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LockSettings {
    pub ttl: Duration,
    pub wait: Duration,
    pub retry: Duration,
}

impl From<&crate::config::WalletConfig> for LockSettings {
    fn from(config: &crate::config::WalletConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.lock_ttl_ms),
            wait: Duration::from_millis(config.lock_wait_ms),
            retry: Duration::from_millis(config.lock_retry_ms.max(1)),
        }
    }
}

/// `DistributedLock` over any `SharedCache`
pub struct CacheLock {
    cache: Arc<dyn SharedCache>,
    settings: LockSettings,
}

impl CacheLock {
    pub fn new(cache: Arc<dyn SharedCache>, settings: LockSettings) -> Self {
        Self { cache, settings }
    }
}

#[async_trait]
impl DistributedLock for CacheLock {
    async fn acquire(&self, key: &str) -> EngineResult<LockGuard> {
        let token = Uuid::new_v4().as_bytes().to_vec();
        let deadline = Instant::now() + self.settings.wait;
        let mut backoff = self.settings.retry;

        loop {
            if self
                .cache
                .set_nx(key, token.clone(), Some(self.settings.ttl))?
            {
                return Ok(LockGuard {
                    cache: self.cache.clone(),
                    key: key.to_string(),
                    token,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(key, "Timed out waiting for lock");
                return Err(StorageError::LockTimeout(key.to_string()).into());
            }

            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(self.settings.retry * 16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn lock(wait_ms: u64) -> CacheLock {
        CacheLock::new(
            Arc::new(MemoryCache::new()),
            LockSettings {
                ttl: Duration::from_secs(5),
                wait: Duration::from_millis(wait_ms),
                retry: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let lock = lock(50);
        {
            let guard = lock.acquire("lock:wallet:1").await.unwrap();
            assert_eq!(guard.key(), "lock:wallet:1");
            assert!(lock.acquire("lock:wallet:1").await.is_err());
        }
        assert!(lock.acquire("lock:wallet:1").await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_is_transient_storage_error() {
        let lock = lock(10);
        let _held = lock.acquire("k").await.unwrap();
        let err = lock.acquire("k").await.err().unwrap();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let lock = Arc::new(lock(5_000));
        let inside = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("shared").await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
