//! Persistent period, order and wallet records.
//!
//! Records are JSON under string key prefixes. Secondary indexes (orders of a
//! period, open orders, open periods, request ids) are staged in the same
//! `WriteSet` as the record they point to so they never drift apart.

use crate::errors::{EngineResult, StorageError};
use crate::games::types::{BetType, Order, Period, PeriodStatus, Wallet};
use crate::storage::{KvStore, ScanDirection, WriteSet};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const PERIOD_PREFIX: &str = "period:";
const OPEN_PERIOD_PREFIX: &str = "period:open:";
const ORDER_PREFIX: &str = "order:";
const PERIOD_ORDERS_PREFIX: &str = "order:period:";
const OPEN_ORDERS_PREFIX: &str = "order:open:";
const REQUEST_PREFIX: &str = "order:req:";
const WALLET_PREFIX: &str = "wallet:";
const PRESET_PREFIX: &str = "preset:";

const SCAN_PAGE: usize = 500;

pub fn period_key(bet_type: BetType, period_id: &str) -> String {
    format!("{}{}:{}", PERIOD_PREFIX, bet_type, period_id)
}

fn periods_prefix(bet_type: BetType) -> String {
    format!("{}{}:", PERIOD_PREFIX, bet_type)
}

fn open_period_key(bet_type: BetType, period_id: &str) -> String {
    format!("{}{}:{}", OPEN_PERIOD_PREFIX, bet_type, period_id)
}

pub fn order_key(order_id: &str) -> String {
    format!("{}{}", ORDER_PREFIX, order_id)
}

fn period_orders_prefix(bet_type: BetType, period_id: &str) -> String {
    format!("{}{}:{}:", PERIOD_ORDERS_PREFIX, bet_type, period_id)
}

// Arrival order within a period: created_at micros, then id
fn period_order_index_key(order: &Order) -> String {
    format!(
        "{}{:020}:{}",
        period_orders_prefix(order.bet_type, &order.period_id),
        order.created_at.timestamp_micros().max(0),
        order.order_id
    )
}

fn open_orders_prefix(bet_type: BetType) -> String {
    format!("{}{}:", OPEN_ORDERS_PREFIX, bet_type)
}

fn open_order_key(order: &Order) -> String {
    format!(
        "{}{}:{}",
        open_orders_prefix(order.bet_type),
        order.period_id,
        order.order_id
    )
}

fn request_key(uid: u64, request_id: &str) -> String {
    format!("{}{}:{}", REQUEST_PREFIX, uid, request_id)
}

pub fn wallet_key(uid: u64) -> String {
    format!("{}{}", WALLET_PREFIX, uid)
}

pub fn preset_key(date: NaiveDate, bet_type: BetType) -> String {
    format!("{}{}:{}", PRESET_PREFIX, date.format("%Y%m%d"), bet_type)
}

/// Typed access to the round records of one store
#[derive(Clone)]
pub struct RoundStore {
    store: Arc<dyn KvStore>,
}

impl RoundStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn commit(&self, ws: WriteSet) -> EngineResult<()> {
        if ws.is_empty() {
            return Ok(());
        }
        self.store.write(ws)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        let Some(bytes) = self.store.get(key.as_bytes())? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::CorruptedData(format!("Failed to decode {}: {}", key, e))
        })?;
        Ok(Some(value))
    }

    // ---- periods ----

    pub fn load_period(&self, bet_type: BetType, period_id: &str) -> EngineResult<Option<Period>> {
        self.get_json(&period_key(bet_type, period_id))
    }

    /// Most recent period of a room across all dates
    pub fn latest_period(&self, bet_type: BetType) -> EngineResult<Option<Period>> {
        self.first_period(&periods_prefix(bet_type))
    }

    /// Most recent period of a room on one date
    pub fn latest_period_on(&self, bet_type: BetType, date: NaiveDate) -> EngineResult<Option<Period>> {
        let prefix = format!("{}{}", periods_prefix(bet_type), date.format("%Y%m%d"));
        self.first_period(&prefix)
    }

    fn first_period(&self, prefix: &str) -> EngineResult<Option<Period>> {
        let rows = self
            .store
            .scan_prefix(prefix.as_bytes(), None, 1, ScanDirection::Reverse)?;
        match rows.into_iter().next() {
            Some((key, value)) => Ok(Some(decode(&key, &value)?)),
            None => Ok(None),
        }
    }

    pub fn stage_period(&self, ws: &mut WriteSet, period: &Period) -> EngineResult<()> {
        ws.put_json(period_key(period.bet_type, &period.period_id), period)?;
        let open_key = open_period_key(period.bet_type, &period.period_id);
        match period.status {
            PeriodStatus::Created => ws.put(open_key, period.period_id.clone().into_bytes()),
            PeriodStatus::Settled => ws.delete(open_key),
        }
        Ok(())
    }

    /// Unsettled periods of a room, oldest first
    pub fn open_periods(&self, bet_type: BetType, limit: usize) -> EngineResult<Vec<Period>> {
        let prefix = format!("{}{}:", OPEN_PERIOD_PREFIX, bet_type);
        let rows = self
            .store
            .scan_prefix(prefix.as_bytes(), None, limit.max(1), ScanDirection::Forward)?;

        let mut periods = Vec::with_capacity(rows.len());
        for (_key, value) in rows {
            let period_id = String::from_utf8_lossy(&value).to_string();
            match self.load_period(bet_type, &period_id)? {
                Some(period) => periods.push(period),
                None => {
                    tracing::warn!(%bet_type, %period_id, "Open-period index points at missing period")
                }
            }
        }
        Ok(periods)
    }

    /// Settled periods newest first, starting strictly after `cursor`
    pub fn settled_periods(
        &self,
        bet_type: BetType,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<Period>, Option<String>)> {
        let prefix = periods_prefix(bet_type);
        let mut after = cursor.map(|c| period_key(bet_type, c).into_bytes());
        let mut out = Vec::with_capacity(limit);

        while out.len() < limit {
            let rows = self.store.scan_prefix(
                prefix.as_bytes(),
                after.as_deref(),
                limit.max(1),
                ScanDirection::Reverse,
            )?;
            let exhausted = rows.len() < limit.max(1);

            for (key, value) in rows {
                after = Some(key.clone());
                let period: Period = decode(&key, &value)?;
                if period.is_settled() {
                    out.push(period);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
            if exhausted {
                break;
            }
        }

        let next = if out.len() >= limit {
            out.last().map(|p| p.period_id.clone())
        } else {
            None
        };
        Ok((out, next))
    }

    // ---- orders ----

    pub fn load_order(&self, order_id: &str) -> EngineResult<Option<Order>> {
        self.get_json(&order_key(order_id))
    }

    pub fn stage_order(&self, ws: &mut WriteSet, order: &Order) -> EngineResult<()> {
        ws.put_json(order_key(&order.order_id), order)?;
        ws.put(period_order_index_key(order), order.order_id.clone().into_bytes());
        ws.put(
            request_key(order.uid, &order.request_id),
            order.order_id.clone().into_bytes(),
        );
        if order.is_open() {
            ws.put(open_order_key(order), order.order_id.clone().into_bytes());
        } else {
            ws.delete(open_order_key(order));
        }
        Ok(())
    }

    pub fn order_by_request(&self, uid: u64, request_id: &str) -> EngineResult<Option<Order>> {
        let Some(order_id) = self.store.get(request_key(uid, request_id).as_bytes())? else {
            return Ok(None);
        };
        self.load_order(&String::from_utf8_lossy(&order_id))
    }

    /// All orders of a period in arrival order
    pub fn period_orders(&self, bet_type: BetType, period_id: &str) -> EngineResult<Vec<Order>> {
        let prefix = period_orders_prefix(bet_type, period_id);
        self.orders_under(&prefix, usize::MAX)
    }

    /// Oldest order still waiting for settlement in a room
    pub fn oldest_open_order(&self, bet_type: BetType) -> EngineResult<Option<Order>> {
        Ok(self
            .orders_under(&open_orders_prefix(bet_type), 1)?
            .into_iter()
            .next())
    }

    fn orders_under(&self, prefix: &str, limit: usize) -> EngineResult<Vec<Order>> {
        let mut orders = Vec::new();
        let mut after: Option<Vec<u8>> = None;

        loop {
            let page = SCAN_PAGE.min(limit - orders.len());
            let rows = self.store.scan_prefix(
                prefix.as_bytes(),
                after.as_deref(),
                page,
                ScanDirection::Forward,
            )?;
            let done = rows.len() < page;

            for (key, value) in rows {
                let order_id = String::from_utf8_lossy(&value).to_string();
                match self.load_order(&order_id)? {
                    Some(order) => orders.push(order),
                    None => tracing::warn!(%order_id, "Order index points at missing order"),
                }
                after = Some(key);
            }
            if done || orders.len() >= limit {
                break;
            }
        }
        Ok(orders)
    }

    // ---- wallets ----

    pub fn load_wallet(&self, uid: u64) -> EngineResult<Option<Wallet>> {
        self.get_json(&wallet_key(uid))
    }

    pub fn stage_wallet(&self, ws: &mut WriteSet, wallet: &Wallet) -> EngineResult<()> {
        ws.put_json(wallet_key(wallet.uid), wallet)
    }

    // ---- preset lists ----

    pub fn load_preset(&self, date: NaiveDate, bet_type: BetType) -> EngineResult<Option<Vec<u8>>> {
        self.get_json(&preset_key(date, bet_type))
    }

    /// Persist a preset list unless one already exists; returns the stored list
    pub fn save_preset_once(
        &self,
        date: NaiveDate,
        bet_type: BetType,
        digits: Vec<u8>,
    ) -> EngineResult<Vec<u8>> {
        if let Some(existing) = self.load_preset(date, bet_type)? {
            return Ok(existing);
        }
        let mut ws = WriteSet::new();
        ws.put_json(preset_key(date, bet_type), &digits)?;
        self.commit(ws)?;
        Ok(digits)
    }
}

fn decode<T: DeserializeOwned>(key: &[u8], value: &[u8]) -> EngineResult<T> {
    serde_json::from_slice(value).map_err(|e| {
        StorageError::CorruptedData(format!(
            "Failed to decode {}: {}",
            String::from_utf8_lossy(key),
            e
        ))
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{format_period_id, OrderStatus, Selection};
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn store() -> RoundStore {
        RoundStore::new(Arc::new(MemoryStore::new()))
    }

    pub(crate) fn period(bet_type: BetType, index: u32, status: PeriodStatus) -> Period {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap()
            + Duration::seconds(i64::from(bet_type.interval_secs() * (index - 1)));
        Period {
            period_id: format_period_id(date, index),
            bet_type,
            period_date: date,
            period_index: index,
            preset_number: (index % 10) as u8,
            number: None,
            start_time: start,
            end_time: start + Duration::seconds(i64::from(bet_type.interval_secs())),
            status,
            bet_amount: 0,
            reward_amount: 0,
            fee: 0,
            profit: 0,
            player_count: 0,
            order_count: 0,
            price: None,
            settled_at: None,
        }
    }

    fn order(id: &str, period: &Period, micros: i64) -> Order {
        Order {
            order_id: id.to_string(),
            uid: 1,
            period_id: period.period_id.clone(),
            bet_type: period.bet_type,
            selection: Selection::Digit(1),
            stake: 100,
            fee: 2,
            reward_amount: None,
            status: OrderStatus::Created,
            balance_snapshot: 400,
            promoter_code: None,
            request_id: format!("req-{}", id),
            created_at: Utc.timestamp_micros(micros).unwrap(),
            settled_at: None,
        }
    }

    #[test]
    fn test_latest_and_open_periods() {
        let store = store();
        let mut ws = WriteSet::new();
        for index in 1..=3 {
            let status = if index < 3 { PeriodStatus::Settled } else { PeriodStatus::Created };
            store.stage_period(&mut ws, &period(BetType::Wingo1, index, status)).unwrap();
        }
        store.stage_period(&mut ws, &period(BetType::Wingo3, 9, PeriodStatus::Created)).unwrap();
        store.commit(ws).unwrap();

        let latest = store.latest_period(BetType::Wingo1).unwrap().unwrap();
        assert_eq!(latest.period_index, 3);

        let open = store.open_periods(BetType::Wingo1, 10).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].period_index, 3);
    }

    #[test]
    fn test_settled_history_pages_newest_first() {
        let store = store();
        let mut ws = WriteSet::new();
        for index in 1..=5 {
            let status = if index < 5 { PeriodStatus::Settled } else { PeriodStatus::Created };
            store.stage_period(&mut ws, &period(BetType::Nine1, index, status)).unwrap();
        }
        store.commit(ws).unwrap();

        let (page, next) = store.settled_periods(BetType::Nine1, None, 3).unwrap();
        let indexes: Vec<u32> = page.iter().map(|p| p.period_index).collect();
        assert_eq!(indexes, vec![4, 3, 2]);

        let (rest, next) = store.settled_periods(BetType::Nine1, next.as_deref(), 3).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].period_index, 1);
        assert!(next.is_none());
    }

    #[test]
    fn test_order_indexes_follow_status() {
        let store = store();
        let p = period(BetType::Wingo1, 1, PeriodStatus::Created);
        let first = order("b", &p, 1_000);
        let second = order("a", &p, 2_000);

        let mut ws = WriteSet::new();
        store.stage_order(&mut ws, &first).unwrap();
        store.stage_order(&mut ws, &second).unwrap();
        store.commit(ws).unwrap();

        let ids: Vec<String> = store
            .period_orders(BetType::Wingo1, &p.period_id)
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(
            store.order_by_request(1, "req-a").unwrap().unwrap().order_id,
            "a"
        );

        let mut settled = first.clone();
        settled.status = OrderStatus::Settled;
        let mut ws = WriteSet::new();
        store.stage_order(&mut ws, &settled).unwrap();
        store.commit(ws).unwrap();

        let oldest = store.oldest_open_order(BetType::Wingo1).unwrap().unwrap();
        assert_eq!(oldest.order_id, "a");
        assert_eq!(store.period_orders(BetType::Wingo1, &p.period_id).unwrap().len(), 2);
    }

    #[test]
    fn test_preset_saved_once() {
        let store = store();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let first = store.save_preset_once(date, BetType::Wingo1, vec![1, 2, 3]).unwrap();
        let second = store.save_preset_once(date, BetType::Wingo1, vec![9, 9, 9]).unwrap();
        assert_eq!(first, second);
    }
}
