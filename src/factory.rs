//! Wires the store, cache, locks, wallet gateway, ledger queue, flags and one
//! round engine per game into a running platform.

use crate::area_limit::{AreaLimitController, FlagService};
use crate::cache::{MemoryCache, SharedCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, StorageBackend};
use crate::engine::{EngineDeps, RoundEngine};
use crate::errors::{DomainError, EngineResult};
use crate::games::types::GameKind;
use crate::identity::StoreDirectory;
use crate::ledger::{LedgerEmitter, LedgerSink, LocalTaskQueue, RetryPolicy, StoreLedgerSink};
use crate::lock::{CacheLock, DistributedLock, LockSettings};
use crate::metrics::EngineMetrics;
use crate::round_store::RoundStore;
use crate::storage::{KvStore, MemoryStore, RocksStore};
use crate::wallet::WalletGateway;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const LEDGER_QUEUE_CAPACITY: usize = 10_000;

pub struct Platform {
    pub config: EngineConfig,
    pub store: RoundStore,
    pub cache: Arc<dyn SharedCache>,
    pub wallet: Arc<WalletGateway>,
    pub directory: Arc<StoreDirectory>,
    pub flags: Arc<FlagService>,
    pub area_limit: Arc<AreaLimitController>,
    pub ledger: Arc<StoreLedgerSink>,
    pub metrics: Arc<EngineMetrics>,
    engines: HashMap<GameKind, Arc<RoundEngine>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Platform {
    pub fn engine(&self, kind: GameKind) -> EngineResult<&Arc<RoundEngine>> {
        self.engines
            .get(&kind)
            .ok_or_else(|| DomainError::RoomNotExist(kind.to_string()).into())
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<RoundEngine>> {
        self.engines.values()
    }

    /// Start round drivers and recovery loops
    pub fn spawn_workers(&self) {
        for engine in self.engines.values() {
            engine.spawn_workers();
        }
    }

    pub fn shutdown(&self) {
        for engine in self.engines.values() {
            engine.shutdown();
        }
        if let Ok(mut background) = self.background.lock() {
            for handle in background.drain(..) {
                handle.abort();
            }
        }
    }
}

pub struct PlatformFactory;

impl PlatformFactory {
    pub fn open_store(config: &EngineConfig) -> EngineResult<Arc<dyn KvStore>> {
        Ok(match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
            StorageBackend::RocksDb => {
                tracing::info!(path = %config.storage.data_directory, "Opening RocksDB store");
                Arc::new(RocksStore::new_with_config(
                    &config.storage.data_directory,
                    &config.storage,
                )?)
            }
        })
    }

    pub async fn create(config: EngineConfig) -> EngineResult<Platform> {
        let store = Self::open_store(&config)?;
        Self::create_with(config, store, Arc::new(SystemClock)).await
    }

    /// Build on an existing store and clock (tests, tools)
    pub async fn create_with(
        config: EngineConfig,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Platform> {
        config.validate()?;

        let store = RoundStore::new(kv);
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        let locks: Arc<dyn DistributedLock> =
            Arc::new(CacheLock::new(cache.clone(), LockSettings::from(&config.wallet)));
        let metrics = Arc::new(EngineMetrics::new()?);
        let cache_ttl = Duration::from_secs(config.wallet.cache_ttl_secs);

        let ledger = Arc::new(StoreLedgerSink::new(store.clone()));
        let sink: Arc<dyn LedgerSink> = ledger.clone();
        let (queue, ledger_worker) = LocalTaskQueue::start(sink, metrics.clone(), LEDGER_QUEUE_CAPACITY);
        let emitter = LedgerEmitter::new(queue, RetryPolicy::from(&config.settlement));

        let wallet = Arc::new(WalletGateway::new(
            store.clone(),
            cache.clone(),
            locks.clone(),
            emitter,
            clock.clone(),
            cache_ttl,
        ));

        let directory = Arc::new(StoreDirectory::new(store.clone(), cache.clone(), cache_ttl));
        let flags = Arc::new(FlagService::new());
        let area_limit = Arc::new(AreaLimitController::new(flags.clone(), directory.clone()));
        let listener = area_limit.clone().spawn_listener();

        let deps = EngineDeps {
            store: store.clone(),
            cache: cache.clone(),
            locks,
            wallet: wallet.clone(),
            users: directory.clone(),
            area_limit: area_limit.clone(),
            clock,
            metrics: metrics.clone(),
        };

        let mut engines = HashMap::new();
        for kind in [GameKind::Wingo, GameKind::Nine] {
            if config.rooms_for(kind).is_empty() {
                tracing::info!(game = %kind, "No rooms configured, skipping engine");
                continue;
            }
            engines.insert(kind, RoundEngine::start(kind, &config, deps.clone()));
        }

        Ok(Platform {
            config,
            store,
            cache,
            wallet,
            directory,
            flags,
            area_limit,
            ledger,
            metrics,
            engines,
            background: Mutex::new(vec![ledger_worker, listener]),
        })
    }
}
