//! Order intake: validate a bet, debit the stake and persist the order.

use crate::area_limit::AreaLimitController;
use crate::clock::Clock;
use crate::config::GameConfig;
use crate::errors::{DomainError, EngineError, EngineResult, ValidationError};
use crate::games::types::{BetRequest, BetType, Order, OrderStatus, Period};
use crate::games::{apply_bps, RoundGame};
use crate::identity::UserDirectory;
use crate::ledger::FlowType;
use crate::lock::DistributedLock;
use crate::metrics::EngineMetrics;
use crate::round_store::RoundStore;
use crate::scheduler::period_settle_lock_key;
use crate::wallet::WalletGateway;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub struct OrderIntake {
    store: RoundStore,
    wallet: Arc<WalletGateway>,
    locks: Arc<dyn DistributedLock>,
    users: Arc<dyn UserDirectory>,
    area_limit: Arc<AreaLimitController>,
    game: Arc<dyn RoundGame>,
    rooms: Vec<BetType>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    fee_bps: u32,
    min_stake: i64,
    max_stake: i64,
    bet_close_secs: u32,
}

fn ensure_accepting(period: &Period, now: DateTime<Utc>, close_secs: u32) -> EngineResult<()> {
    if period.is_settled() || now >= period.bet_deadline(close_secs) || now < period.start_time {
        return Err(DomainError::PeriodClosed(period.period_id.clone()).into());
    }
    Ok(())
}

impl OrderIntake {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: RoundStore,
        wallet: Arc<WalletGateway>,
        locks: Arc<dyn DistributedLock>,
        users: Arc<dyn UserDirectory>,
        area_limit: Arc<AreaLimitController>,
        game: Arc<dyn RoundGame>,
        rooms: Vec<BetType>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        config: &GameConfig,
    ) -> Self {
        Self {
            store,
            wallet,
            locks,
            users,
            area_limit,
            game,
            rooms,
            clock,
            metrics,
            fee_bps: config.fee_bps,
            min_stake: config.min_stake,
            max_stake: config.max_stake,
            bet_close_secs: config.bet_close_secs,
        }
    }

    /// Place a bet. A retry with the same `request_id` returns the first order.
    pub async fn place_bet(&self, req: BetRequest) -> EngineResult<Order> {
        match self.try_place(req).await {
            Ok(order) => Ok(order),
            Err(e) => {
                self.metrics.bets_rejected.with_label_values(&[e.reason()]).inc();
                Err(e)
            }
        }
    }

    fn validate(&self, req: &BetRequest) -> EngineResult<()> {
        if req.request_id.trim().is_empty() {
            return Err(ValidationError::MissingField("request_id").into());
        }
        if !self.rooms.contains(&req.bet_type) {
            return Err(DomainError::RoomNotExist(req.bet_type.to_string()).into());
        }
        if req.stake < self.min_stake || req.stake > self.max_stake {
            return Err(ValidationError::InvalidStake {
                stake: req.stake,
                min: self.min_stake,
                max: self.max_stake,
            }
            .into());
        }
        self.game.validate_selection(&req.selection)
    }

    async fn try_place(&self, req: BetRequest) -> EngineResult<Order> {
        self.validate(&req)?;

        let user = self
            .users
            .find_user(req.uid)
            .await?
            .ok_or(DomainError::UserNotFound(req.uid))?;
        let not_allowed = || -> EngineError {
            DomainError::BettingNotAllowed {
                bet_type: req.bet_type.to_string(),
            }
            .into()
        };
        if user.disabled || !self.area_limit.permits(user.promoter_code.as_deref(), req.bet_type) {
            return Err(not_allowed());
        }

        if let Some(existing) = self.store.order_by_request(req.uid, &req.request_id)? {
            tracing::debug!(uid = req.uid, order_id = %existing.order_id, "Duplicate bet request");
            return Ok(existing);
        }

        let period = self
            .store
            .latest_period(req.bet_type)?
            .ok_or_else(|| DomainError::PeriodClosed(req.bet_type.to_string()))?;
        ensure_accepting(&period, self.clock.now(), self.bet_close_secs)?;

        let wallet = self.wallet.peek_wallet(req.uid)?;
        if req.stake > wallet.cash {
            return Err(DomainError::InsufficientBalance {
                required: req.stake,
                available: wallet.cash,
            }
            .into());
        }

        let fee = apply_bps(req.stake, self.fee_bps);
        let close_secs = self.bet_close_secs;
        let period_id = period.period_id.clone();
        let request = req.clone();

        // Period before wallet: finalization holds the same lock while it
        // reads the orders, so no order can land after the aggregates are taken
        let _period_guard = self
            .locks
            .acquire(&period_settle_lock_key(req.bet_type, &period_id))
            .await?;
        let (order, created) = self
            .wallet
            .handle_wallet(req.uid, move |tx| {
                let store = tx.store();
                if let Some(existing) = store.order_by_request(request.uid, &request.request_id)? {
                    return Ok((existing, false));
                }

                // Re-check under the lock; the round may have closed meanwhile
                let period = store
                    .load_period(request.bet_type, &period_id)?
                    .ok_or_else(|| DomainError::PeriodNotFound(period_id.clone()))?;
                ensure_accepting(&period, tx.now(), close_secs)?;

                let order_id = Uuid::new_v4().to_string();
                let balance = tx.debit(
                    request.stake,
                    FlowType::Bet,
                    format!("bet {} {}", request.bet_type, period_id),
                    Some(order_id.clone()),
                )?;

                let order = Order {
                    order_id,
                    uid: request.uid,
                    period_id: period_id.clone(),
                    bet_type: request.bet_type,
                    selection: request.selection,
                    stake: request.stake,
                    fee,
                    reward_amount: None,
                    status: OrderStatus::Created,
                    balance_snapshot: balance,
                    promoter_code: tx.wallet().promoter_code.clone(),
                    request_id: request.request_id,
                    created_at: tx.now(),
                    settled_at: None,
                };
                store.stage_order(tx.writes(), &order)?;
                Ok((order, true))
            })
            .await?;

        if created {
            self.metrics
                .bets_placed
                .with_label_values(&[order.bet_type.code()])
                .inc();
            tracing::info!(
                uid = order.uid,
                bet_type = %order.bet_type,
                period_id = %order.period_id,
                order_id = %order.order_id,
                stake = order.stake,
                selection = %order.selection,
                "Bet placed"
            );
        }
        Ok(order)
    }

    /// Refund and cancel a still-open order of a still-open round
    pub async fn cancel_order(&self, uid: u64, order_id: &str) -> EngineResult<Order> {
        let close_secs = self.bet_close_secs;
        let order_id = order_id.to_string();

        let order = self
            .wallet
            .handle_wallet(uid, move |tx| {
                let store = tx.store();
                let mut order = store
                    .load_order(&order_id)?
                    .filter(|o| o.uid == uid)
                    .ok_or_else(|| DomainError::OrderNotFound(order_id.clone()))?;
                if !order.is_open() {
                    return Err(DomainError::OrderNotCancellable(order_id.clone()).into());
                }
                let period = store
                    .load_period(order.bet_type, &order.period_id)?
                    .ok_or_else(|| DomainError::PeriodNotFound(order.period_id.clone()))?;
                if ensure_accepting(&period, tx.now(), close_secs).is_err() {
                    return Err(DomainError::OrderNotCancellable(order_id.clone()).into());
                }

                order.status = OrderStatus::Cancelled;
                order.settled_at = Some(tx.now());
                store.stage_order(tx.writes(), &order)?;
                tx.credit(
                    order.stake,
                    FlowType::Refund,
                    format!("cancel {} {}", order.bet_type, order.period_id),
                    Some(order.order_id.clone()),
                )?;
                Ok(order)
            })
            .await?;

        tracing::info!(uid, order_id = %order.order_id, stake = order.stake, "Order cancelled");
        Ok(order)
    }
}
