//! Period scheduler
//!
//! Each room draws from a per-day list of pre-committed digits, one per
//! round slot from midnight to midnight. Periods are numbered per
//! (room, date) starting at 1 with no gaps.

use crate::cache::{get_json, set_json, LocalCache, SharedCache};
use crate::clock::Clock;
use crate::config::GameConfig;
use crate::errors::{DomainError, EngineResult};
use crate::games::types::{ensure_digit, format_period_id, BetType, Period, PeriodStatus};
use crate::lock::DistributedLock;
use crate::round_store::{preset_key, RoundStore};
use crate::storage::WriteSet;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const PRESET_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(2 * 86_400);

pub fn period_settle_lock_key(bet_type: BetType, period_id: &str) -> String {
    format!("lock:period:settle:{}:{}", bet_type, period_id)
}

fn period_create_lock_key(bet_type: BetType, date: NaiveDate) -> String {
    format!("lock:period:{}:{}", bet_type, date.format("%Y%m%d"))
}

/// Deterministic per-day digits for a room, shuffled once
pub fn generate_preset(seed: &str, date: NaiveDate, bet_type: BetType) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(b"|");
    hasher.update(date.format("%Y%m%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(bet_type.code().as_bytes());
    let mut seed_bytes = [0u8; 32];
    seed_bytes.copy_from_slice(&hasher.finalize());
    let mut rng = StdRng::from_seed(seed_bytes);

    let mut digits: Vec<u8> = (0..bet_type.slots_per_day())
        .map(|_| rng.gen_range(0..10))
        .collect();
    digits.shuffle(&mut rng);
    digits
}

pub struct PeriodScheduler {
    store: RoundStore,
    cache: Arc<dyn SharedCache>,
    local: LocalCache<(NaiveDate, BetType), Arc<Vec<u8>>>,
    locks: Arc<dyn DistributedLock>,
    clock: Arc<dyn Clock>,
    seed: String,
    utc_offset_secs: i64,
}

impl PeriodScheduler {
    pub fn new(
        store: RoundStore,
        cache: Arc<dyn SharedCache>,
        locks: Arc<dyn DistributedLock>,
        clock: Arc<dyn Clock>,
        config: &GameConfig,
    ) -> Self {
        Self {
            store,
            cache,
            local: LocalCache::new(config.preset_cache_capacity),
            locks,
            clock,
            seed: config.preset_seed.clone(),
            utc_offset_secs: i64::from(config.utc_offset_secs),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Calendar date of `at` in the configured offset
    pub fn period_date(&self, at: DateTime<Utc>) -> NaiveDate {
        (at + Duration::seconds(self.utc_offset_secs)).date_naive()
    }

    /// UTC instant of local midnight starting `date`
    pub fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)) - Duration::seconds(self.utc_offset_secs)
    }

    /// Start of the round slot containing `at`
    fn slot_start(&self, bet_type: BetType, at: DateTime<Utc>) -> DateTime<Utc> {
        let day_start = self.day_start(self.period_date(at));
        let interval = i64::from(bet_type.interval_secs());
        let elapsed = (at - day_start).num_seconds();
        day_start + Duration::seconds(elapsed - elapsed.rem_euclid(interval))
    }

    /// Local LRU, then shared cache, then store, then generate and persist
    pub fn preset_number_list(&self, date: NaiveDate, bet_type: BetType) -> EngineResult<Arc<Vec<u8>>> {
        if let Some(list) = self.local.get(&(date, bet_type)) {
            return Ok(list);
        }

        let key = preset_key(date, bet_type);
        let list = match get_json::<Vec<u8>>(self.cache.as_ref(), &key)? {
            Some(list) => list,
            None => {
                let list = match self.store.load_preset(date, bet_type)? {
                    Some(list) => list,
                    None => {
                        let generated = generate_preset(&self.seed, date, bet_type);
                        tracing::info!(%bet_type, %date, slots = generated.len(), "Generated preset list");
                        self.store.save_preset_once(date, bet_type, generated)?
                    }
                };
                set_json(self.cache.as_ref(), &key, &list, Some(PRESET_CACHE_TTL))?;
                list
            }
        };

        let list = Arc::new(list);
        self.local.put((date, bet_type), list.clone());
        Ok(list)
    }

    /// Create the next period of a room for the current date
    pub async fn create_period(&self, bet_type: BetType, manual: Option<u8>) -> EngineResult<Period> {
        if let Some(d) = manual {
            ensure_digit(d)?;
        }
        let now = self.clock.now();
        let date = self.period_date(now);
        let _guard = self.locks.acquire(&period_create_lock_key(bet_type, date)).await?;
        self.create_locked(bet_type, date, now, manual)
    }

    /// The unsettled latest period of a room, or a freshly created next one
    pub async fn current_or_next(&self, bet_type: BetType) -> EngineResult<Period> {
        let now = self.clock.now();
        let date = self.period_date(now);
        let _guard = self.locks.acquire(&period_create_lock_key(bet_type, date)).await?;

        if let Some(latest) = self.store.latest_period(bet_type)? {
            if !latest.is_settled() {
                return Ok(latest);
            }
        }
        self.create_locked(bet_type, date, now, None)
    }

    fn create_locked(
        &self,
        bet_type: BetType,
        date: NaiveDate,
        now: DateTime<Utc>,
        manual: Option<u8>,
    ) -> EngineResult<Period> {
        let latest = self.store.latest_period_on(bet_type, date)?;
        let index = latest.as_ref().map_or(1, |p| p.period_index + 1);

        let interval = Duration::seconds(i64::from(bet_type.interval_secs()));
        let slot_start = self.slot_start(bet_type, now);
        let start_time = match latest {
            Some(ref p) if p.end_time > slot_start => p.end_time,
            _ => slot_start,
        };
        let mut end_time = slot_start + interval;
        if end_time <= start_time {
            end_time = start_time + interval;
        }

        let preset_number = match manual {
            Some(d) => d,
            None => {
                let list = self.preset_number_list(date, bet_type)?;
                match list.get(index as usize - 1) {
                    Some(d) => *d,
                    None => {
                        tracing::warn!(%bet_type, index, "Period index beyond preset list, drawing fresh digit");
                        rand::thread_rng().gen_range(0..10)
                    }
                }
            }
        };

        let period = Period {
            period_id: format_period_id(date, index),
            bet_type,
            period_date: date,
            period_index: index,
            preset_number,
            number: None,
            start_time,
            end_time,
            status: PeriodStatus::Created,
            bet_amount: 0,
            reward_amount: 0,
            fee: 0,
            profit: 0,
            player_count: 0,
            order_count: 0,
            price: None,
            settled_at: None,
        };

        let mut ws = WriteSet::new();
        self.store.stage_period(&mut ws, &period)?;
        self.store.commit(ws)?;

        tracing::info!(
            %bet_type,
            period_id = %period.period_id,
            end_time = %period.end_time,
            "Period opened"
        );
        Ok(period)
    }

    /// Fix the drawn number of a still-open period
    pub async fn override_number(&self, bet_type: BetType, period_id: &str, digit: u8) -> EngineResult<Period> {
        ensure_digit(digit)?;
        let _guard = self
            .locks
            .acquire(&period_settle_lock_key(bet_type, period_id))
            .await?;

        let mut period = self
            .store
            .load_period(bet_type, period_id)?
            .ok_or_else(|| DomainError::PeriodNotFound(period_id.to_string()))?;
        if period.is_settled() {
            return Err(DomainError::PeriodClosed(period_id.to_string()).into());
        }

        period.number = Some(digit);
        let mut ws = WriteSet::new();
        self.store.stage_period(&mut ws, &period)?;
        self.store.commit(ws)?;

        tracing::info!(%bet_type, %period_id, digit, "Manual draw set");
        Ok(period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::lock::{CacheLock, LockSettings};
    use crate::storage::MemoryStore;
    use std::collections::HashSet;

    fn scheduler_at(start: DateTime<Utc>) -> (Arc<PeriodScheduler>, Arc<ManualClock>) {
        let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
        let locks = Arc::new(CacheLock::new(
            cache.clone(),
            LockSettings {
                ttl: std::time::Duration::from_secs(5),
                wait: std::time::Duration::from_secs(5),
                retry: std::time::Duration::from_millis(1),
            },
        ));
        let clock = Arc::new(ManualClock::new(start));
        let scheduler = PeriodScheduler::new(
            RoundStore::new(Arc::new(MemoryStore::new())),
            cache,
            locks,
            clock.clone(),
            &GameConfig::default(),
        );
        (Arc::new(scheduler), clock)
    }

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    #[test]
    fn test_preset_list_is_deterministic_and_sized() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let a = generate_preset("seed", date, BetType::Wingo1);
        let b = generate_preset("seed", date, BetType::Wingo1);
        let c = generate_preset("seed", date, BetType::Wingo3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1440);
        assert_eq!(c.len(), 480);
        assert!(a.iter().all(|d| *d < 10));
        assert_ne!(a, generate_preset("other", date, BetType::Wingo1));
    }

    #[test]
    fn test_preset_lookup_is_idempotent() {
        let (scheduler, _) = scheduler_at(t(10, 0, 0));
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let first = scheduler.preset_number_list(date, BetType::Nine5).unwrap();
        let second = scheduler.preset_number_list(date, BetType::Nine5).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            scheduler.store.load_preset(date, BetType::Nine5).unwrap().unwrap(),
            *first
        );
    }

    #[tokio::test]
    async fn test_periods_follow_slots_and_preset() {
        let (scheduler, clock) = scheduler_at(t(0, 2, 30));
        let first = scheduler.create_period(BetType::Wingo1, None).await.unwrap();
        assert_eq!(first.period_id, "202610190001");
        assert_eq!(first.start_time, t(0, 2, 0));
        assert_eq!(first.end_time, t(0, 3, 0));

        let list = scheduler
            .preset_number_list(first.period_date, BetType::Wingo1)
            .unwrap();
        assert_eq!(first.preset_number, list[0]);

        clock.set(t(0, 3, 1));
        let second = scheduler.create_period(BetType::Wingo1, Some(4)).await.unwrap();
        assert_eq!(second.period_index, 2);
        assert_eq!(second.preset_number, 4);
        assert_eq!(second.start_time, t(0, 3, 0));
    }

    #[tokio::test]
    async fn test_index_resets_on_new_day() {
        let (scheduler, clock) = scheduler_at(t(23, 59, 30));
        scheduler.create_period(BetType::Wingo1, None).await.unwrap();
        clock.set(Utc.with_ymd_and_hms(2026, 10, 20, 0, 0, 5).unwrap());
        let next = scheduler.create_period(BetType::Wingo1, None).await.unwrap();
        assert_eq!(next.period_id, "202610200001");
    }

    #[tokio::test]
    async fn test_concurrent_creation_is_gapless() {
        let (scheduler, _) = scheduler_at(t(12, 0, 0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                scheduler.create_period(BetType::Nine1, None).await.unwrap().period_index
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            assert!(seen.insert(h.await.unwrap()));
        }
        let expected: HashSet<u32> = (1..=16).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_index_beyond_preset_list_draws_fresh_digit() {
        let (scheduler, _) = scheduler_at(t(6, 0, 0));
        let slots = BetType::Wingo10.slots_per_day();
        let mut last = None;
        for _ in 0..=slots {
            last = Some(scheduler.create_period(BetType::Wingo10, None).await.unwrap());
        }
        let last = last.unwrap();

        let list = scheduler
            .preset_number_list(last.period_date, BetType::Wingo10)
            .unwrap();
        assert_eq!(list.len() as u32, slots);
        assert_eq!(last.period_index, slots + 1);
        assert!(last.preset_number <= 9);
        assert_eq!(last.period_id, format!("20261019{:04}", slots + 1));
        assert_eq!(last.period_id, "202610190145");
    }

    #[tokio::test]
    async fn test_current_or_next_reuses_open_period() {
        let (scheduler, _) = scheduler_at(t(8, 0, 0));
        let a = scheduler.current_or_next(BetType::Wingo5).await.unwrap();
        let b = scheduler.current_or_next(BetType::Wingo5).await.unwrap();
        assert_eq!(a.period_id, b.period_id);
    }

    #[tokio::test]
    async fn test_override_number() {
        let (scheduler, _) = scheduler_at(t(8, 0, 0));
        let p = scheduler.create_period(BetType::Wingo1, None).await.unwrap();
        let updated = scheduler
            .override_number(BetType::Wingo1, &p.period_id, 7)
            .await
            .unwrap();
        assert_eq!(updated.outcome(), 7);
        assert!(scheduler
            .override_number(BetType::Wingo1, "209901010001", 1)
            .await
            .is_err());
        assert!(scheduler
            .override_number(BetType::Wingo1, &p.period_id, 12)
            .await
            .is_err());
    }

    #[test]
    fn test_utc_offset_shifts_period_date() {
        let (scheduler, _) = scheduler_at(t(0, 0, 0));
        let mut config = GameConfig::default();
        config.utc_offset_secs = 8 * 3600;
        let shifted = PeriodScheduler::new(
            scheduler.store.clone(),
            scheduler.cache.clone(),
            scheduler.locks.clone(),
            Arc::new(ManualClock::new(t(0, 0, 0))),
            &config,
        );
        let at = t(20, 0, 0);
        assert_eq!(shifted.period_date(at), NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
        assert_eq!(
            shifted.day_start(NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()),
            t(16, 0, 0)
        );
    }
}
