//! Rounds, orders and wallets survive closing and reopening the RocksDB store

use chrono::{Duration, TimeZone, Utc};
use roundbet::{
    clock::ManualClock,
    config::{EngineConfig, StorageBackend},
    factory::PlatformFactory,
    games::types::{BetRequest, BetType, GameKind, OrderStatus, PeriodStatus, Selection},
    identity::User,
    storage::{KvStore, RocksStore},
};
use std::sync::Arc;

fn config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::testing();
    config.storage.backend = StorageBackend::RocksDb;
    config.storage.data_directory = dir.to_string_lossy().to_string();
    config.storage.clear_on_start = false;
    config
}

#[tokio::test]
async fn test_state_persists_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 10).unwrap(),
    ));

    // Phase 1: open a round, fund a player, bet
    let (order_id, period_id) = {
        let config = config(dir.path());
        let kv: Arc<dyn KvStore> = Arc::new(RocksStore::new_with_config(dir.path(), &config.storage).unwrap());
        let platform = PlatformFactory::create_with(config, kv, clock.clone()).await.unwrap();
        let engine = platform.engine(GameKind::Wingo).unwrap().clone();
        engine.tick().await.unwrap();

        platform
            .directory
            .put_user(&User {
                uid: 7,
                nickname: "seven".to_string(),
                promoter_code: None,
                disabled: false,
            })
            .unwrap();
        platform.wallet.ensure_wallet(7, None).await.unwrap();
        platform.wallet.deposit(7, 1_000, "seed").await.unwrap();

        let order = engine
            .place_bet(BetRequest {
                uid: 7,
                bet_type: BetType::Wingo1,
                selection: Selection::Digit(4),
                stake: 300,
                request_id: "persist-1".to_string(),
            })
            .await
            .unwrap();

        platform.shutdown();
        (order.order_id, order.period_id)
    };

    // Aborted workers release their store handles on the next scheduler pass
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // Phase 2: reopen; the open round is still there and recovery settles it
    let config = config(dir.path());
    let kv: Arc<dyn KvStore> = Arc::new(RocksStore::new_with_config(dir.path(), &config.storage).unwrap());
    let platform = PlatformFactory::create_with(config, kv, clock.clone()).await.unwrap();

    let wallet = platform.store.load_wallet(7).unwrap().unwrap();
    assert_eq!(wallet.cash, 700);
    let order = platform.store.load_order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    let retried = platform.store.order_by_request(7, "persist-1").unwrap().unwrap();
    assert_eq!(retried.order_id, order_id);

    clock.advance(Duration::seconds(90));
    let engine = platform.engine(GameKind::Wingo).unwrap();
    let report = engine.run_recovery().await.unwrap();
    assert_eq!(report.periods_finalized, 1);

    for _ in 0..500 {
        let status = platform.store.load_order(&order_id).unwrap().unwrap().status;
        if status == OrderStatus::Settled {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let period = platform
        .store
        .load_period(BetType::Wingo1, &period_id)
        .unwrap()
        .unwrap();
    assert_eq!(period.status, PeriodStatus::Settled);
    assert_eq!(period.bet_amount, 300);

    let order = platform.store.load_order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Settled);
    let reward = order.reward_amount.unwrap();
    assert_eq!(platform.store.load_wallet(7).unwrap().unwrap().cash, 700 + reward);

    platform.shutdown();
}
