//! Round engine: one instance per game, exposing the bet/settle operations.

use crate::accumulator::{BatchReport, SettlementAccumulator};
use crate::area_limit::AreaLimitController;
use crate::cache::SharedCache;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::errors::{DomainError, EngineResult};
use crate::executor::SettlementExecutor;
use crate::games::types::{Amount, BetRequest, BetType, GameKind, Order, Period, PeriodStatus};
use crate::games::{build_game, RoundGame};
use crate::identity::UserDirectory;
use crate::intake::OrderIntake;
use crate::lock::DistributedLock;
use crate::metrics::EngineMetrics;
use crate::recovery::{RecoveryReport, RecoveryScanner};
use crate::round_store::RoundStore;
use crate::scheduler::PeriodScheduler;
use crate::wallet::WalletGateway;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Shared collaborators every engine is built from
#[derive(Clone)]
pub struct EngineDeps {
    pub store: RoundStore,
    pub cache: Arc<dyn SharedCache>,
    pub locks: Arc<dyn DistributedLock>,
    pub wallet: Arc<WalletGateway>,
    pub users: Arc<dyn UserDirectory>,
    pub area_limit: Arc<AreaLimitController>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<EngineMetrics>,
}

/// Client view of a period; the preset digit of an open round stays hidden
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PeriodView {
    pub period_id: String,
    pub bet_type: BetType,
    pub period_date: NaiveDate,
    pub period_index: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: PeriodStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u8>,
    pub bet_amount: Amount,
    pub reward_amount: Amount,
    pub player_count: u32,
    pub order_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl From<&Period> for PeriodView {
    fn from(p: &Period) -> Self {
        let settled = p.is_settled();
        Self {
            period_id: p.period_id.clone(),
            bet_type: p.bet_type,
            period_date: p.period_date,
            period_index: p.period_index,
            start_time: p.start_time,
            end_time: p.end_time,
            status: p.status,
            number: if settled { Some(p.outcome()) } else { None },
            bet_amount: p.bet_amount,
            reward_amount: p.reward_amount,
            player_count: p.player_count,
            order_count: p.order_count,
            price: p.price.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomView {
    pub bet_type: BetType,
    pub interval_secs: u32,
    pub bet_close_secs: u32,
    pub min_stake: Amount,
    pub max_stake: Amount,
    pub fee_bps: u32,
    pub betting_allowed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub game: GameKind,
    pub rooms: Vec<RoomView>,
    pub payouts: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub bet_type: BetType,
    pub server_time: DateTime<Utc>,
    pub current: Option<PeriodView>,
    pub seconds_left: i64,
    pub betting_open: bool,
    pub last_settled: Option<PeriodView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Amount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub items: Vec<PeriodView>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulateReport {
    pub period: PeriodView,
    pub report: BatchReport,
    pub next_period_id: String,
}

pub struct RoundEngine {
    kind: GameKind,
    rooms: Vec<BetType>,
    game: Arc<dyn RoundGame>,
    store: RoundStore,
    scheduler: Arc<PeriodScheduler>,
    intake: OrderIntake,
    executor: Arc<SettlementExecutor>,
    accumulator: Arc<SettlementAccumulator>,
    recovery: Arc<RecoveryScanner>,
    wallet: Arc<WalletGateway>,
    area_limit: Arc<AreaLimitController>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RoundEngine {
    /// Build the engine of one game and start its accumulator worker
    pub fn start(kind: GameKind, config: &EngineConfig, deps: EngineDeps) -> Arc<Self> {
        let rooms = config.rooms_for(kind).to_vec();
        let game = build_game(kind, &config.game);

        let scheduler = Arc::new(PeriodScheduler::new(
            deps.store.clone(),
            deps.cache.clone(),
            deps.locks.clone(),
            deps.clock.clone(),
            &config.game,
        ));
        let executor = Arc::new(SettlementExecutor::new(
            deps.store.clone(),
            deps.wallet.clone(),
            deps.locks.clone(),
            game.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
            config.game.price_prefix.clone(),
        ));
        let (accumulator, accumulator_worker) = SettlementAccumulator::start(
            executor.clone(),
            config.debounce(),
            config.settlement.batch_size,
            deps.metrics.clone(),
        );
        let intake = OrderIntake::new(
            deps.store.clone(),
            deps.wallet.clone(),
            deps.locks.clone(),
            deps.users.clone(),
            deps.area_limit.clone(),
            game.clone(),
            rooms.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
            &config.game,
        );
        let recovery = Arc::new(RecoveryScanner::new(
            deps.store.clone(),
            executor.clone(),
            accumulator.clone(),
            rooms.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
            config.recovery.grace_secs,
            config.recovery.max_periods_per_scan,
        ));

        tracing::info!(game = %kind, rooms = ?rooms, "Round engine started");

        Arc::new(Self {
            kind,
            rooms,
            game,
            store: deps.store,
            scheduler,
            intake,
            executor,
            accumulator,
            recovery,
            wallet: deps.wallet,
            area_limit: deps.area_limit,
            clock: deps.clock,
            config: config.clone(),
            workers: Mutex::new(vec![accumulator_worker]),
        })
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn rooms(&self) -> &[BetType] {
        &self.rooms
    }

    pub fn scheduler(&self) -> &Arc<PeriodScheduler> {
        &self.scheduler
    }

    pub fn executor(&self) -> &Arc<SettlementExecutor> {
        &self.executor
    }

    pub fn accumulator(&self) -> &Arc<SettlementAccumulator> {
        &self.accumulator
    }

    fn ensure_room(&self, bet_type: BetType) -> EngineResult<()> {
        if self.rooms.contains(&bet_type) {
            Ok(())
        } else {
            Err(DomainError::RoomNotExist(bet_type.to_string()).into())
        }
    }

    pub async fn place_bet(&self, req: BetRequest) -> EngineResult<Order> {
        self.intake.place_bet(req).await
    }

    pub async fn cancel_order(&self, uid: u64, order_id: &str) -> EngineResult<Order> {
        self.intake.cancel_order(uid, order_id).await
    }

    pub fn room_info(&self) -> RoomInfo {
        let game = &self.config.game;
        RoomInfo {
            game: self.kind,
            rooms: self
                .rooms
                .iter()
                .map(|bet_type| RoomView {
                    bet_type: *bet_type,
                    interval_secs: bet_type.interval_secs(),
                    bet_close_secs: game.bet_close_secs,
                    min_stake: game.min_stake,
                    max_stake: game.max_stake,
                    fee_bps: game.fee_bps,
                    betting_allowed: !self.area_limit.is_active(),
                })
                .collect(),
            payouts: self.game.payout_table(),
        }
    }

    /// Current round snapshot for clients polling a room
    pub fn state_sync(&self, bet_type: BetType, uid: Option<u64>) -> EngineResult<StateSnapshot> {
        self.ensure_room(bet_type)?;
        let now = self.clock.now();

        let current = self
            .store
            .latest_period(bet_type)?
            .filter(|p| !p.is_settled());
        let (seconds_left, betting_open) = match current {
            Some(ref p) => (
                (p.end_time - now).num_seconds().max(0),
                now >= p.start_time && now < p.bet_deadline(self.config.game.bet_close_secs),
            ),
            None => (0, false),
        };
        let (last_settled, _) = self.store.settled_periods(bet_type, None, 1)?;
        let balance = match uid {
            Some(uid) => Some(self.wallet.peek_wallet(uid)?.cash),
            None => None,
        };

        Ok(StateSnapshot {
            bet_type,
            server_time: now,
            current: current.as_ref().map(PeriodView::from),
            seconds_left,
            betting_open,
            last_settled: last_settled.first().map(PeriodView::from),
            balance,
        })
    }

    pub fn period_history(
        &self,
        bet_type: BetType,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<HistoryPage> {
        self.ensure_room(bet_type)?;
        let (periods, next_cursor) = self
            .store
            .settled_periods(bet_type, cursor, limit.clamp(1, 100))?;
        Ok(HistoryPage {
            items: periods.iter().map(PeriodView::from).collect(),
            next_cursor,
        })
    }

    pub async fn override_number(&self, bet_type: BetType, period_id: &str, digit: u8) -> EngineResult<PeriodView> {
        self.ensure_room(bet_type)?;
        let period = self.scheduler.override_number(bet_type, period_id, digit).await?;
        Ok(PeriodView::from(&period))
    }

    /// Close the current round now, settle its orders inline, open the next
    pub async fn simulate_settle_orders(&self, bet_type: BetType, number: Option<u8>) -> EngineResult<SimulateReport> {
        self.ensure_room(bet_type)?;
        let current = self.scheduler.current_or_next(bet_type).await?;
        if let Some(digit) = number {
            self.scheduler
                .override_number(bet_type, &current.period_id, digit)
                .await?;
        }

        let finalized = self
            .executor
            .finalize_period(bet_type, &current.period_id, true)
            .await?;
        let report = self.executor.settle_orders(finalized.pending).await;
        let next = self.scheduler.current_or_next(bet_type).await?;

        tracing::info!(
            %bet_type,
            period_id = %current.period_id,
            settled = report.settled,
            "Manual settlement done"
        );
        Ok(SimulateReport {
            period: PeriodView::from(&finalized.period),
            report,
            next_period_id: next.period_id,
        })
    }

    /// Advance every room: settle an expired round and open the next
    pub async fn tick(&self) -> EngineResult<()> {
        let results = join_all(self.rooms.iter().map(|bt| self.tick_room(*bt))).await;
        for (bet_type, result) in self.rooms.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(%bet_type, error = %e, "Round tick failed");
            }
        }
        Ok(())
    }

    async fn tick_room(&self, bet_type: BetType) -> EngineResult<()> {
        let now = self.clock.now();
        match self.store.latest_period(bet_type)? {
            Some(period) if !period.is_settled() => {
                if !period.has_ended(now) {
                    return Ok(());
                }
                let finalized = self
                    .executor
                    .finalize_period(bet_type, &period.period_id, false)
                    .await?;
                self.accumulator.push(finalized.pending);
                self.scheduler.current_or_next(bet_type).await?;
            }
            _ => {
                self.scheduler.current_or_next(bet_type).await?;
            }
        }
        Ok(())
    }

    pub async fn run_recovery(&self) -> EngineResult<RecoveryReport> {
        self.recovery.run_once().await
    }

    /// Start the round driver and, when enabled, the recovery loop
    pub fn spawn_workers(self: &Arc<Self>) {
        let mut handles = Vec::new();

        let engine = self.clone();
        let every = self.config.tick_interval();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.tick().await {
                    tracing::error!(game = %engine.kind, error = %e, "Round driver tick failed");
                }
            }
        }));

        if self.config.recovery.enabled {
            handles.push(self.recovery.clone().spawn(self.config.recovery_interval()));
        }

        if let Ok(mut workers) = self.workers.lock() {
            workers.extend(handles);
        }
    }

    pub fn shutdown(&self) {
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                handle.abort();
            }
        }
        tracing::info!(game = %self.kind, "Round engine stopped");
    }
}
