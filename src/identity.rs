//! User and promoter lookups consumed by order intake and the area limit.

use crate::cache::{get_json, set_json, SharedCache};
use crate::errors::EngineResult;
use crate::games::types::BetType;
use crate::round_store::RoundStore;
use crate::storage::{ScanDirection, WriteSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const USER_PREFIX: &str = "user:";
const PROMOTER_PREFIX: &str = "promoter:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub uid: u64,
    pub nickname: String,
    #[serde(default)]
    pub promoter_code: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// A promoter and the single room its users may bet in while the area limit is on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Promoter {
    pub code: String,
    pub bet_type: BetType,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, uid: u64) -> EngineResult<Option<User>>;
}

#[async_trait]
pub trait PromoterDirectory: Send + Sync {
    async fn promoters(&self) -> EngineResult<Vec<Promoter>>;
}

/// Store-backed directory with cached user lookups
pub struct StoreDirectory {
    store: RoundStore,
    cache: Arc<dyn SharedCache>,
    ttl: Duration,
}

fn user_key(uid: u64) -> String {
    format!("{}{}", USER_PREFIX, uid)
}

fn user_cache_key(uid: u64) -> String {
    format!("cache:user:{}", uid)
}

impl StoreDirectory {
    pub fn new(store: RoundStore, cache: Arc<dyn SharedCache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    pub fn put_user(&self, user: &User) -> EngineResult<()> {
        let mut ws = WriteSet::new();
        ws.put_json(user_key(user.uid), user)?;
        self.store.commit(ws)?;
        self.cache.delete(&user_cache_key(user.uid))
    }

    pub fn put_promoter(&self, promoter: &Promoter) -> EngineResult<()> {
        let mut ws = WriteSet::new();
        ws.put_json(format!("{}{}", PROMOTER_PREFIX, promoter.code), promoter)?;
        self.store.commit(ws)
    }
}

#[async_trait]
impl UserDirectory for StoreDirectory {
    async fn find_user(&self, uid: u64) -> EngineResult<Option<User>> {
        let cache_key = user_cache_key(uid);
        if let Some(user) = get_json::<User>(self.cache.as_ref(), &cache_key)? {
            return Ok(Some(user));
        }

        let user: Option<User> = self.store.get_json(&user_key(uid))?;
        if let Some(ref user) = user {
            set_json(self.cache.as_ref(), &cache_key, user, Some(self.ttl))?;
        }
        Ok(user)
    }
}

#[async_trait]
impl PromoterDirectory for StoreDirectory {
    async fn promoters(&self) -> EngineResult<Vec<Promoter>> {
        let rows = self.store.kv().scan_prefix(
            PROMOTER_PREFIX.as_bytes(),
            None,
            usize::MAX,
            ScanDirection::Forward,
        )?;
        let mut promoters = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            match serde_json::from_slice::<Promoter>(&value) {
                Ok(p) => promoters.push(p),
                Err(e) => tracing::warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable promoter record"
                ),
            }
        }
        Ok(promoters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::storage::MemoryStore;

    fn directory() -> StoreDirectory {
        StoreDirectory::new(
            RoundStore::new(Arc::new(MemoryStore::new())),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_user_lookup_is_cached_and_invalidated() {
        let dir = directory();
        assert!(dir.find_user(7).await.unwrap().is_none());

        let mut user = User {
            uid: 7,
            nickname: "seven".to_string(),
            promoter_code: None,
            disabled: false,
        };
        dir.put_user(&user).unwrap();
        assert_eq!(dir.find_user(7).await.unwrap().unwrap().nickname, "seven");
        assert!(dir.cache.get("cache:user:7").unwrap().is_some());

        user.nickname = "renamed".to_string();
        dir.put_user(&user).unwrap();
        assert_eq!(dir.find_user(7).await.unwrap().unwrap().nickname, "renamed");
    }

    #[tokio::test]
    async fn test_promoters_listed() {
        let dir = directory();
        dir.put_promoter(&Promoter { code: "A1".to_string(), bet_type: BetType::Wingo3 }).unwrap();
        dir.put_promoter(&Promoter { code: "B2".to_string(), bet_type: BetType::Nine1 }).unwrap();
        let all = dir.promoters().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].bet_type, BetType::Wingo3);
    }
}
