//! Settlement executor
//!
//! Finalizes periods (drawn number, aggregates, display price) and settles
//! orders. Each order is re-read under its owner's wallet lock and only
//! settled if it is still `Created`; the status change and the reward credit
//! commit in one write set, so a duplicate delivery of the same order cannot
//! credit twice.

use crate::accumulator::{BatchHandler, BatchReport};
use crate::clock::Clock;
use crate::errors::{DomainError, EngineResult};
use crate::games::price::display_price;
use crate::games::types::{Amount, BetType, OrderStatus, PendingSettlement, Period, PeriodStatus};
use crate::games::RoundGame;
use crate::ledger::FlowType;
use crate::lock::DistributedLock;
use crate::metrics::EngineMetrics;
use crate::round_store::RoundStore;
use crate::scheduler::period_settle_lock_key;
use crate::storage::WriteSet;
use crate::wallet::WalletGateway;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of finalizing a period
#[derive(Debug, Clone)]
pub struct Finalized {
    pub period: Period,
    /// Orders of the period still waiting for their reward
    pub pending: Vec<PendingSettlement>,
    /// False when the period had already been settled
    pub newly_settled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    Settled(Amount),
    Skipped,
}

pub struct SettlementExecutor {
    store: RoundStore,
    wallet: Arc<WalletGateway>,
    locks: Arc<dyn DistributedLock>,
    game: Arc<dyn RoundGame>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    price_prefix: String,
}

impl SettlementExecutor {
    pub fn new(
        store: RoundStore,
        wallet: Arc<WalletGateway>,
        locks: Arc<dyn DistributedLock>,
        game: Arc<dyn RoundGame>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        price_prefix: String,
    ) -> Self {
        Self {
            store,
            wallet,
            locks,
            game,
            clock,
            metrics,
            price_prefix,
        }
    }

    pub fn game(&self) -> &Arc<dyn RoundGame> {
        &self.game
    }

    /// Draw and aggregate a period; a no-op on an already settled one.
    ///
    /// `close_early` moves the end time up to now for manual settlement.
    pub async fn finalize_period(
        &self,
        bet_type: BetType,
        period_id: &str,
        close_early: bool,
    ) -> EngineResult<Finalized> {
        let _guard = self
            .locks
            .acquire(&period_settle_lock_key(bet_type, period_id))
            .await?;

        let mut period = self
            .store
            .load_period(bet_type, period_id)?
            .ok_or_else(|| DomainError::PeriodNotFound(period_id.to_string()))?;
        let orders = self.store.period_orders(bet_type, period_id)?;

        if period.is_settled() {
            let outcome = period.outcome();
            let pending = orders
                .into_iter()
                .filter(|o| o.is_open())
                .map(|order| PendingSettlement { order, outcome })
                .collect();
            return Ok(Finalized {
                period,
                pending,
                newly_settled: false,
            });
        }

        let now = self.clock.now();
        let outcome = period.outcome();
        period.number = Some(outcome);
        if close_early && now < period.end_time {
            period.end_time = now;
        }

        let mut bet_amount: Amount = 0;
        let mut fee: Amount = 0;
        let mut reward_amount: Amount = 0;
        let mut players = HashSet::new();
        let mut order_count = 0u32;
        let mut pending = Vec::new();

        for order in orders {
            if order.status == OrderStatus::Cancelled {
                continue;
            }
            bet_amount += order.stake;
            fee += order.fee;
            reward_amount += order
                .reward_amount
                .unwrap_or_else(|| self.game.compute_reward(outcome, &order.selection, order.stake));
            players.insert(order.uid);
            order_count += 1;
            if order.is_open() {
                pending.push(PendingSettlement { order, outcome });
            }
        }

        period.bet_amount = bet_amount;
        period.fee = fee;
        period.reward_amount = reward_amount;
        period.profit = bet_amount - reward_amount;
        period.player_count = players.len() as u32;
        period.order_count = order_count;
        period.price = Some(self.price_for(bet_amount, reward_amount, outcome));
        period.status = PeriodStatus::Settled;
        period.settled_at = Some(now);

        let mut ws = WriteSet::new();
        self.store.stage_period(&mut ws, &period)?;
        self.store.commit(ws)?;

        self.metrics
            .periods_finalized
            .with_label_values(&[bet_type.code()])
            .inc();
        tracing::info!(
            %bet_type,
            period_id,
            number = outcome,
            bet_amount,
            reward_amount,
            orders = order_count,
            "Period settled"
        );

        Ok(Finalized {
            period,
            pending,
            newly_settled: true,
        })
    }

    fn price_for(&self, bet_amount: Amount, reward_amount: Amount, outcome: u8) -> String {
        display_price(
            &self.price_prefix,
            bet_amount,
            reward_amount,
            outcome,
            &mut rand::thread_rng(),
        )
    }

    /// Settle one order if it is still open
    pub async fn settle_order(&self, pending: &PendingSettlement) -> EngineResult<OrderOutcome> {
        let order_id = pending.order.order_id.clone();
        let outcome = pending.outcome;
        let game = self.game.clone();

        self.wallet
            .handle_wallet(pending.order.uid, move |tx| {
                let mut order = tx
                    .store()
                    .load_order(&order_id)?
                    .ok_or_else(|| DomainError::OrderNotFound(order_id.clone()))?;
                if !order.is_open() {
                    return Ok(OrderOutcome::Skipped);
                }

                let reward = game.compute_reward(outcome, &order.selection, order.stake);
                order.status = OrderStatus::Settled;
                order.reward_amount = Some(reward);
                order.settled_at = Some(tx.now());

                let store = tx.store();
                store.stage_order(tx.writes(), &order)?;
                if reward > 0 {
                    tx.credit(
                        reward,
                        FlowType::Reward,
                        format!("reward {} {}", order.bet_type, order.period_id),
                        Some(order.order_id.clone()),
                    )?;
                }
                Ok(OrderOutcome::Settled(reward))
            })
            .await
    }

    /// Settle in arrival order; one order failing does not stop the rest
    pub async fn settle_orders(&self, batch: Vec<PendingSettlement>) -> BatchReport {
        let mut report = BatchReport::default();
        for pending in &batch {
            match self.settle_order(pending).await {
                Ok(OrderOutcome::Settled(reward)) => {
                    report.settled += 1;
                    report.rewarded += reward;
                    let label = [pending.order.bet_type.code()];
                    self.metrics.orders_settled.with_label_values(&label).inc();
                    if reward > 0 {
                        self.metrics
                            .rewards_credited
                            .with_label_values(&label)
                            .inc_by(reward as u64);
                    }
                }
                Ok(OrderOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        uid = pending.order.uid,
                        order_id = %pending.order.order_id,
                        period_id = %pending.order.period_id,
                        error = %e,
                        "Order settlement failed; left for recovery"
                    );
                }
            }
        }
        report
    }
}

#[async_trait]
impl BatchHandler for SettlementExecutor {
    async fn settle_batch(&self, batch: Vec<PendingSettlement>) -> BatchReport {
        self.settle_orders(batch).await
    }
}
