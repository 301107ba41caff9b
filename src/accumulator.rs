//! Settlement accumulator
//!
//! Orders of closed rounds are pushed here per uid. One worker per game waits
//! for a wake signal, sleeps the debounce window so a whole round's fan-out
//! coalesces, drains everything and dispatches it in bounded batches.
//!
//! Nothing here is durable. A crash loses whatever was not yet settled and the
//! recovery scanner re-derives it from the store.

use crate::games::types::{Amount, PendingSettlement};
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outcome counts of one settlement batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub settled: usize,
    /// Already settled or cancelled by someone else
    pub skipped: usize,
    pub failed: usize,
    pub rewarded: Amount,
}

impl BatchReport {
    pub fn merge(&mut self, other: &BatchReport) {
        self.settled += other.settled;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.rewarded += other.rewarded;
    }
}

#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn settle_batch(&self, batch: Vec<PendingSettlement>) -> BatchReport;
}

#[derive(Default)]
struct PendingState {
    by_uid: HashMap<u64, Vec<PendingSettlement>>,
    /// First-arrival order of uids
    uids: Vec<u64>,
    queued: HashSet<String>,
}

impl PendingState {
    fn drain(&mut self) -> Vec<PendingSettlement> {
        let mut flat = Vec::with_capacity(self.queued.len());
        for uid in self.uids.drain(..) {
            if let Some(items) = self.by_uid.remove(&uid) {
                flat.extend(items);
            }
        }
        self.queued.clear();
        flat
    }
}

pub struct SettlementAccumulator {
    state: Arc<Mutex<PendingState>>,
    wake: mpsc::Sender<()>,
    metrics: Arc<EngineMetrics>,
}

impl SettlementAccumulator {
    pub fn start(
        handler: Arc<dyn BatchHandler>,
        debounce: Duration,
        batch_size: usize,
        metrics: Arc<EngineMetrics>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let state = Arc::new(Mutex::new(PendingState::default()));
        let (wake, mut rx) = mpsc::channel::<()>(1);
        let batch_size = batch_size.max(1);

        let worker_state = state.clone();
        let worker_metrics = metrics.clone();
        let worker = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(debounce).await;

                let drained = match worker_state.lock() {
                    Ok(mut state) => state.drain(),
                    Err(_) => {
                        tracing::error!("Accumulator state poisoned, stopping worker");
                        break;
                    }
                };
                worker_metrics.accumulator_backlog.set(0);
                if drained.is_empty() {
                    continue;
                }

                tracing::debug!(orders = drained.len(), batch_size, "Draining accumulator");
                let mut batch = Vec::with_capacity(batch_size);
                for item in drained {
                    batch.push(item);
                    if batch.len() >= batch_size {
                        dispatch(&handler, std::mem::take(&mut batch), &worker_metrics).await;
                    }
                }
                if !batch.is_empty() {
                    dispatch(&handler, batch, &worker_metrics).await;
                }
            }
            tracing::debug!("Accumulator worker stopped");
        });

        (
            Arc::new(Self {
                state,
                wake,
                metrics,
            }),
            worker,
        )
    }

    /// Queue orders for settlement; duplicates of a queued order are dropped
    pub fn push(&self, items: Vec<PendingSettlement>) {
        if items.is_empty() {
            return;
        }
        let backlog = match self.state.lock() {
            Ok(mut guard) => {
                let state = &mut *guard;
                for item in items {
                    if !state.queued.insert(item.order.order_id.clone()) {
                        continue;
                    }
                    let uid = item.order.uid;
                    if !state.by_uid.contains_key(&uid) {
                        state.uids.push(uid);
                    }
                    state.by_uid.entry(uid).or_default().push(item);
                }
                state.queued.len()
            }
            Err(_) => {
                tracing::error!("Accumulator state poisoned, dropping orders");
                return;
            }
        };
        self.metrics.accumulator_backlog.set(backlog as i64);

        // A full channel already guarantees a pending drain
        let _ = self.wake.try_send(());
    }

    pub fn backlog(&self) -> usize {
        self.state.lock().map(|s| s.queued.len()).unwrap_or(0)
    }
}

async fn dispatch(handler: &Arc<dyn BatchHandler>, batch: Vec<PendingSettlement>, metrics: &EngineMetrics) {
    let size = batch.len();
    metrics.settlement_batches.inc();

    let handler = handler.clone();
    match tokio::spawn(async move { handler.settle_batch(batch).await }).await {
        Ok(report) => {
            tracing::info!(
                batch_size = size,
                settled = report.settled,
                skipped = report.skipped,
                failed = report.failed,
                rewarded = report.rewarded,
                "Settlement batch done"
            );
        }
        Err(e) if e.is_panic() => {
            metrics.batch_panics.inc();
            tracing::error!(batch_size = size, "Settlement batch panicked; remainder left for recovery");
        }
        Err(e) => {
            tracing::error!(batch_size = size, error = %e, "Settlement batch task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{BetType, Order, OrderStatus, Selection};
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        batches: StdMutex<Vec<Vec<String>>>,
        panic_on: Option<String>,
    }

    #[async_trait]
    impl BatchHandler for Recorder {
        async fn settle_batch(&self, batch: Vec<PendingSettlement>) -> BatchReport {
            let ids: Vec<String> = batch.iter().map(|p| p.order.order_id.clone()).collect();
            self.batches.lock().unwrap().push(ids.clone());
            if let Some(ref bad) = self.panic_on {
                if ids.contains(bad) {
                    panic!("boom");
                }
            }
            BatchReport {
                settled: batch.len(),
                ..Default::default()
            }
        }
    }

    fn pending(uid: u64, id: &str) -> PendingSettlement {
        PendingSettlement {
            order: Order {
                order_id: id.to_string(),
                uid,
                period_id: "202610190001".to_string(),
                bet_type: BetType::Wingo1,
                selection: Selection::Digit(1),
                stake: 100,
                fee: 2,
                reward_amount: None,
                status: OrderStatus::Created,
                balance_snapshot: 0,
                promoter_code: None,
                request_id: id.to_string(),
                created_at: Utc::now(),
                settled_at: None,
            },
            outcome: 1,
        }
    }

    fn recorder(panic_on: Option<&str>) -> Arc<Recorder> {
        Arc::new(Recorder {
            batches: StdMutex::new(Vec::new()),
            panic_on: panic_on.map(str::to_string),
        })
    }

    async fn wait_batches(rec: &Recorder, n: usize) -> Vec<Vec<String>> {
        for _ in 0..200 {
            let batches = rec.batches.lock().unwrap().clone();
            if batches.len() >= n {
                return batches;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        rec.batches.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_burst_coalesces_and_keeps_per_user_order() {
        let rec = recorder(None);
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let (acc, _worker) = SettlementAccumulator::start(rec.clone(), Duration::from_millis(30), 100, metrics);

        acc.push(vec![pending(1, "a1"), pending(2, "b1")]);
        acc.push(vec![pending(1, "a2"), pending(1, "a1")]);
        assert_eq!(acc.backlog(), 3);

        let batches = wait_batches(&rec, 1).await;
        assert_eq!(batches, vec![vec!["a1".to_string(), "a2".to_string(), "b1".to_string()]]);
        assert_eq!(acc.backlog(), 0);
    }

    #[tokio::test]
    async fn test_large_drain_is_split() {
        let rec = recorder(None);
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let (acc, _worker) = SettlementAccumulator::start(rec.clone(), Duration::from_millis(10), 4, metrics);

        acc.push((0..10).map(|i| pending(i, &format!("o{}", i))).collect());
        let batches = wait_batches(&rec, 3).await;
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_panicking_batch_does_not_stop_worker() {
        let rec = recorder(Some("bad"));
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let (acc, _worker) =
            SettlementAccumulator::start(rec.clone(), Duration::from_millis(10), 100, metrics.clone());

        acc.push(vec![pending(1, "bad")]);
        wait_batches(&rec, 1).await;
        acc.push(vec![pending(2, "good")]);
        let batches = wait_batches(&rec, 2).await;
        assert_eq!(batches.len(), 2);
        for _ in 0..100 {
            if metrics.batch_panics.get() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(metrics.batch_panics.get(), 1);
    }
}
