//! Ledger (flow) records and their at-least-once delivery queue.
//!
//! A ledger record is emitted after every committed wallet mutation. Delivery
//! is asynchronous with bounded retries; the cash mutation has already
//! committed, so a task that still fails is logged and dropped.

use crate::errors::{DeliveryError, EngineResult};
use crate::games::types::Amount;
use crate::metrics::EngineMetrics;
use crate::round_store::RoundStore;
use crate::storage::WriteSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    Bet,
    Reward,
    Refund,
    Recharge,
}

/// One append-only balance event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerRecord {
    pub task_id: String,
    pub uid: u64,
    pub flow_type: FlowType,
    pub delta: Amount,
    pub balance_after: Amount,
    pub remark: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn new(
        uid: u64,
        flow_type: FlowType,
        delta: Amount,
        balance_after: Amount,
        remark: impl Into<String>,
        order_id: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            uid,
            flow_type,
            delta,
            balance_after,
            remark: remark.into(),
            order_id,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Exponential back-off for the given 1-based retry
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.retry_delay
            .saturating_mul(1u32 << retry.saturating_sub(1).min(10))
    }
}

impl From<&crate::config::SettlementConfig> for RetryPolicy {
    fn from(config: &crate::config::SettlementConfig) -> Self {
        Self {
            max_retry: config.ledger_max_retry,
            retry_delay: Duration::from_millis(config.ledger_retry_delay_ms),
        }
    }
}

/// External at-least-once task queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, record: LedgerRecord, policy: RetryPolicy) -> EngineResult<()>;
}

/// Final destination of ledger records
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn deliver(&self, record: &LedgerRecord) -> EngineResult<()>;
}

/// Writes `ledger:{uid}:{task_id}`; redelivery overwrites the same row
pub struct StoreLedgerSink {
    store: RoundStore,
}

pub fn ledger_key(uid: u64, task_id: &str) -> String {
    format!("ledger:{}:{}", uid, task_id)
}

impl StoreLedgerSink {
    pub fn new(store: RoundStore) -> Self {
        Self { store }
    }

    pub fn records_for(&self, uid: u64) -> EngineResult<Vec<LedgerRecord>> {
        let prefix = format!("ledger:{}:", uid);
        let rows = self.store.kv().scan_prefix(
            prefix.as_bytes(),
            None,
            usize::MAX,
            crate::storage::ScanDirection::Forward,
        )?;
        let mut records = rows
            .into_iter()
            .map(|(_, v)| serde_json::from_slice::<LedgerRecord>(&v))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[async_trait]
impl LedgerSink for StoreLedgerSink {
    async fn deliver(&self, record: &LedgerRecord) -> EngineResult<()> {
        let mut ws = WriteSet::new();
        ws.put_json(ledger_key(record.uid, &record.task_id), record)?;
        self.store.commit(ws)
    }
}

struct QueuedTask {
    record: LedgerRecord,
    policy: RetryPolicy,
}

/// In-process `TaskQueue` delivering to a `LedgerSink`
pub struct LocalTaskQueue {
    tx: mpsc::Sender<QueuedTask>,
}

impl LocalTaskQueue {
    pub fn start(
        sink: Arc<dyn LedgerSink>,
        metrics: Arc<EngineMetrics>,
        capacity: usize,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<QueuedTask>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let sink = sink.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    match deliver_with_retry(sink.as_ref(), &task.record, task.policy).await {
                        Ok(()) => metrics.ledger_delivered.inc(),
                        Err(e) => {
                            metrics.ledger_failed.inc();
                            tracing::error!(
                                uid = task.record.uid,
                                task_id = %task.record.task_id,
                                flow = ?task.record.flow_type,
                                delta = task.record.delta,
                                error = %e,
                                "Dropping ledger record"
                            );
                        }
                    }
                });
            }
            tracing::debug!("Ledger queue closed");
        });

        (Arc::new(Self { tx }), worker)
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, record: LedgerRecord, policy: RetryPolicy) -> EngineResult<()> {
        self.tx
            .send(QueuedTask { record, policy })
            .await
            .map_err(|_| DeliveryError::QueueClosed.into())
    }
}

async fn deliver_with_retry(
    sink: &dyn LedgerSink,
    record: &LedgerRecord,
    policy: RetryPolicy,
) -> EngineResult<()> {
    let mut attempt = 0u32;
    loop {
        match sink.deliver(record).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < policy.max_retry => {
                attempt += 1;
                tracing::warn!(
                    task_id = %record.task_id,
                    attempt,
                    error = %e,
                    "Ledger delivery failed, retrying"
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            Err(e) => {
                return Err(DeliveryError::RetriesExhausted {
                    task_id: record.task_id.clone(),
                    attempts: attempt + 1,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }
}

/// Fire-and-forget front of the queue used after commits
#[derive(Clone)]
pub struct LedgerEmitter {
    queue: Arc<dyn TaskQueue>,
    policy: RetryPolicy,
}

impl LedgerEmitter {
    pub fn new(queue: Arc<dyn TaskQueue>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    /// Enqueue failures are logged, never returned
    pub async fn emit(&self, record: LedgerRecord) {
        let uid = record.uid;
        let task_id = record.task_id.clone();
        if let Err(e) = self.queue.enqueue(record, self.policy).await {
            tracing::warn!(uid, %task_id, error = %e, "Failed to enqueue ledger record");
        }
    }
}
