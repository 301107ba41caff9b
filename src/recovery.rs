//! Recovery scanner
//!
//! Re-drives settlement for periods that ended without being settled and for
//! orders left open after their period settled. Every step goes through the
//! executor's guarded paths, so scanning twice (or concurrently) is harmless.

use crate::accumulator::SettlementAccumulator;
use crate::clock::Clock;
use crate::errors::EngineResult;
use crate::executor::SettlementExecutor;
use crate::games::types::BetType;
use crate::metrics::EngineMetrics;
use crate::round_store::RoundStore;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub periods_finalized: usize,
    pub orders_requeued: usize,
}

pub struct RecoveryScanner {
    store: RoundStore,
    executor: Arc<SettlementExecutor>,
    accumulator: Arc<SettlementAccumulator>,
    rooms: Vec<BetType>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    grace: Duration,
    max_periods: usize,
}

impl RecoveryScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: RoundStore,
        executor: Arc<SettlementExecutor>,
        accumulator: Arc<SettlementAccumulator>,
        rooms: Vec<BetType>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        grace_secs: u64,
        max_periods: usize,
    ) -> Self {
        Self {
            store,
            executor,
            accumulator,
            rooms,
            clock,
            metrics,
            grace: Duration::seconds(grace_secs as i64),
            max_periods: max_periods.max(1),
        }
    }

    /// One pass over every room
    pub async fn run_once(&self) -> EngineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for bet_type in &self.rooms {
            let room = self.scan_room(*bet_type).await?;
            report.periods_finalized += room.periods_finalized;
            report.orders_requeued += room.orders_requeued;
        }
        if report != RecoveryReport::default() {
            tracing::info!(
                periods = report.periods_finalized,
                orders = report.orders_requeued,
                "Recovery pass re-drove settlement"
            );
        }
        Ok(report)
    }

    async fn scan_room(&self, bet_type: BetType) -> EngineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = self.clock.now();

        for period in self.store.open_periods(bet_type, self.max_periods)? {
            if period.end_time + self.grace > now {
                continue;
            }
            let finalized = self
                .executor
                .finalize_period(bet_type, &period.period_id, false)
                .await?;
            if finalized.newly_settled {
                report.periods_finalized += 1;
                self.metrics.recovery_redrives.with_label_values(&["period"]).inc();
                tracing::warn!(%bet_type, period_id = %period.period_id, "Recovered unsettled period");
            }
            report.orders_requeued += finalized.pending.len();
            self.accumulator.push(finalized.pending);
        }

        // Cheap trigger: an open order whose period is already settled
        if let Some(order) = self.store.oldest_open_order(bet_type)? {
            let settled = self
                .store
                .load_period(bet_type, &order.period_id)?
                .map_or(false, |p| p.is_settled());
            if settled {
                let finalized = self
                    .executor
                    .finalize_period(bet_type, &order.period_id, false)
                    .await?;
                self.metrics.recovery_redrives.with_label_values(&["order"]).inc();
                tracing::warn!(
                    %bet_type,
                    period_id = %order.period_id,
                    orders = finalized.pending.len(),
                    "Requeued orders of settled period"
                );
                report.orders_requeued += finalized.pending.len();
                self.accumulator.push(finalized.pending);
            }
        }

        Ok(report)
    }

    pub fn spawn(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Recovery pass failed");
                }
            }
        })
    }
}
