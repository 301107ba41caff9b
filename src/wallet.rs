//! Wallet ledger gateway
//!
//! `handle_wallet` is the only path that mutates `Wallet::cash`: it takes the
//! per-uid distributed lock, loads the wallet, runs the caller's closure
//! against a staged transaction, commits everything the closure staged
//! together with the wallet row, then emits the ledger records.

use crate::cache::{get_json, set_json, SharedCache};
use crate::clock::Clock;
use crate::errors::{DomainError, EngineResult, ValidationError};
use crate::games::types::{Amount, Wallet};
use crate::ledger::{FlowType, LedgerEmitter, LedgerRecord};
use crate::lock::DistributedLock;
use crate::round_store::RoundStore;
use crate::storage::WriteSet;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub fn wallet_lock_key(uid: u64) -> String {
    format!("lock:wallet:{}", uid)
}

fn wallet_cache_key(uid: u64) -> String {
    format!("cache:wallet:{}", uid)
}

/// Staged state handed to a `handle_wallet` closure
pub struct WalletTx<'a> {
    wallet: Wallet,
    writes: WriteSet,
    records: Vec<LedgerRecord>,
    store: &'a RoundStore,
    now: DateTime<Utc>,
    dirty: bool,
}

impl<'a> WalletTx<'a> {
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn cash(&self) -> Amount {
        self.wallet.cash
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Read access to committed records while the lock is held
    pub fn store(&self) -> &'a RoundStore {
        self.store
    }

    pub fn writes(&mut self) -> &mut WriteSet {
        &mut self.writes
    }

    /// Remove `amount` from cash; never drives cash negative
    pub fn debit(
        &mut self,
        amount: Amount,
        flow: FlowType,
        remark: impl Into<String>,
        order_id: Option<String>,
    ) -> EngineResult<Amount> {
        if amount <= 0 {
            return Err(ValidationError::InvalidAmount(amount).into());
        }
        if amount > self.wallet.cash {
            return Err(DomainError::InsufficientBalance {
                required: amount,
                available: self.wallet.cash,
            }
            .into());
        }
        self.apply(-amount, flow, remark, order_id);
        Ok(self.wallet.cash)
    }

    pub fn credit(
        &mut self,
        amount: Amount,
        flow: FlowType,
        remark: impl Into<String>,
        order_id: Option<String>,
    ) -> EngineResult<Amount> {
        if amount <= 0 {
            return Err(ValidationError::InvalidAmount(amount).into());
        }
        self.apply(amount, flow, remark, order_id);
        Ok(self.wallet.cash)
    }

    fn apply(&mut self, delta: Amount, flow: FlowType, remark: impl Into<String>, order_id: Option<String>) {
        self.wallet.cash += delta;
        self.dirty = true;
        self.records.push(LedgerRecord::new(
            self.wallet.uid,
            flow,
            delta,
            self.wallet.cash,
            remark,
            order_id,
            self.now,
        ));
    }
}

pub struct WalletGateway {
    store: RoundStore,
    cache: Arc<dyn SharedCache>,
    locks: Arc<dyn DistributedLock>,
    ledger: LedgerEmitter,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
}

impl WalletGateway {
    pub fn new(
        store: RoundStore,
        cache: Arc<dyn SharedCache>,
        locks: Arc<dyn DistributedLock>,
        ledger: LedgerEmitter,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            locks,
            ledger,
            clock,
            cache_ttl,
        }
    }

    pub fn locks(&self) -> &Arc<dyn DistributedLock> {
        &self.locks
    }

    /// Run `f` inside the per-uid lock and one atomic commit.
    ///
    /// An error from `f` discards everything it staged.
    pub async fn handle_wallet<T, F>(&self, uid: u64, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut WalletTx<'_>) -> EngineResult<T> + Send,
        T: Send,
    {
        let guard = self.locks.acquire(&wallet_lock_key(uid)).await?;

        let wallet = self
            .store
            .load_wallet(uid)?
            .ok_or(DomainError::WalletNotFound(uid))?;

        let mut tx = WalletTx {
            wallet,
            writes: WriteSet::new(),
            records: Vec::new(),
            store: &self.store,
            now: self.clock.now(),
            dirty: false,
        };

        let out = f(&mut tx)?;

        let WalletTx {
            mut wallet,
            mut writes,
            records,
            now,
            dirty,
            ..
        } = tx;

        if dirty {
            wallet.version += 1;
            wallet.updated_at = now;
            self.store.stage_wallet(&mut writes, &wallet)?;
        }
        self.store.commit(writes)?;

        if dirty {
            if let Err(e) = self.cache.delete(&wallet_cache_key(uid)) {
                tracing::warn!(uid, error = %e, "Failed to invalidate cached wallet");
            }
        }
        drop(guard);

        for record in records {
            self.ledger.emit(record).await;
        }
        Ok(out)
    }

    /// Possibly stale read for pre-checks and display
    pub fn peek_wallet(&self, uid: u64) -> EngineResult<Wallet> {
        let key = wallet_cache_key(uid);
        if let Some(wallet) = get_json::<Wallet>(self.cache.as_ref(), &key)? {
            return Ok(wallet);
        }
        let wallet = self
            .store
            .load_wallet(uid)?
            .ok_or(DomainError::WalletNotFound(uid))?;
        set_json(self.cache.as_ref(), &key, &wallet, Some(self.cache_ttl))?;
        Ok(wallet)
    }

    /// Create an empty wallet if the user has none
    pub async fn ensure_wallet(&self, uid: u64, promoter_code: Option<String>) -> EngineResult<Wallet> {
        let _guard = self.locks.acquire(&wallet_lock_key(uid)).await?;
        if let Some(existing) = self.store.load_wallet(uid)? {
            return Ok(existing);
        }

        let wallet = Wallet {
            uid,
            cash: 0,
            promoter_code,
            security_level: 0,
            version: 0,
            updated_at: self.clock.now(),
        };
        let mut ws = WriteSet::new();
        self.store.stage_wallet(&mut ws, &wallet)?;
        self.store.commit(ws)?;
        tracing::info!(uid, "Created wallet");
        Ok(wallet)
    }

    /// Credit external funds; returns the balance after
    pub async fn deposit(&self, uid: u64, amount: Amount, remark: &str) -> EngineResult<Amount> {
        let balance = self
            .handle_wallet(uid, |tx| tx.credit(amount, FlowType::Recharge, remark, None))
            .await?;
        tracing::info!(uid, amount, balance, "Deposit committed");
        Ok(balance)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::SystemClock;
    use crate::ledger::{LedgerSink, LocalTaskQueue, RetryPolicy, StoreLedgerSink};
    use crate::lock::{CacheLock, LockSettings};
    use crate::metrics::EngineMetrics;
    use crate::storage::MemoryStore;

    pub(crate) fn gateway() -> (Arc<WalletGateway>, Arc<StoreLedgerSink>) {
        let store = RoundStore::new(Arc::new(MemoryStore::new()));
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        let locks = Arc::new(CacheLock::new(
            cache.clone(),
            LockSettings {
                ttl: Duration::from_secs(5),
                wait: Duration::from_secs(2),
                retry: Duration::from_millis(1),
            },
        ));
        let sink = Arc::new(StoreLedgerSink::new(store.clone()));
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let sink_dyn: Arc<dyn LedgerSink> = sink.clone();
        let (queue, _) = LocalTaskQueue::start(sink_dyn, metrics, 64);
        let ledger = LedgerEmitter::new(
            queue,
            RetryPolicy {
                max_retry: 1,
                retry_delay: Duration::from_millis(1),
            },
        );
        let gateway = WalletGateway::new(
            store,
            cache,
            locks,
            ledger,
            Arc::new(SystemClock),
            Duration::from_secs(60),
        );
        (Arc::new(gateway), sink)
    }

    #[tokio::test]
    async fn test_debit_and_credit_commit_together() {
        let (gw, _) = gateway();
        gw.ensure_wallet(1, None).await.unwrap();
        gw.deposit(1, 500, "seed").await.unwrap();

        let after = gw
            .handle_wallet(1, |tx| tx.debit(100, FlowType::Bet, "bet", None))
            .await
            .unwrap();
        assert_eq!(after, 400);
        assert_eq!(gw.peek_wallet(1).unwrap().cash, 400);
        assert_eq!(gw.peek_wallet(1).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_failed_closure_leaves_no_trace() {
        let (gw, _) = gateway();
        gw.ensure_wallet(1, None).await.unwrap();
        gw.deposit(1, 500, "seed").await.unwrap();

        let err = gw
            .handle_wallet(1, |tx| {
                tx.debit(100, FlowType::Bet, "first", None)?;
                tx.writes().put("marker", b"x".to_vec());
                tx.debit(1_000, FlowType::Bet, "too much", None)
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "insufficient_balance");
        assert_eq!(gw.peek_wallet(1).unwrap().cash, 500);
        assert!(gw.store.kv().get(b"marker").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_wallet() {
        let (gw, _) = gateway();
        let err = gw.deposit(42, 10, "x").await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::EngineError::Domain(DomainError::WalletNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let (gw, _) = gateway();
        gw.ensure_wallet(5, None).await.unwrap();
        gw.deposit(5, 1_000, "seed").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let gw = gw.clone();
            handles.push(tokio::spawn(async move {
                gw.handle_wallet(5, |tx| tx.debit(100, FlowType::Bet, "bet", None))
                    .await
                    .is_ok()
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 10);
        assert_eq!(gw.store.load_wallet(5).unwrap().unwrap().cash, 0);
    }
}
