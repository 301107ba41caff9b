use roundbet::games::types::{BetType, Period};
use roundbet::round_store::RoundStore;
use roundbet::storage::{KvStore, RocksStore, ScanDirection, WriteSet};
use std::sync::Arc;

const PAGE: usize = 500;

/// Re-stage every period and order of the given rooms so the open-period,
/// open-order and request-id indexes match the records again.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./roundbet_data".to_string());
    let rooms: Vec<BetType> = match std::env::args().nth(2) {
        Some(room) => vec![room.parse()?],
        None => BetType::ALL.to_vec(),
    };

    println!("Opening database: {}", db_path);
    let kv: Arc<dyn KvStore> = Arc::new(RocksStore::new(&db_path)?);
    let store = RoundStore::new(kv.clone());

    for room in rooms {
        let prefix = format!("period:{}:", room);
        let mut after: Option<Vec<u8>> = None;
        let (mut periods, mut orders) = (0usize, 0usize);

        loop {
            let rows = kv.scan_prefix(prefix.as_bytes(), after.as_deref(), PAGE, ScanDirection::Forward)?;
            let done = rows.len() < PAGE;

            for (key, value) in rows {
                after = Some(key);
                let period: Period = serde_json::from_slice(&value)?;

                let mut ws = WriteSet::new();
                store.stage_period(&mut ws, &period)?;
                for order in store.period_orders(room, &period.period_id)? {
                    store.stage_order(&mut ws, &order)?;
                    orders += 1;
                }
                store.commit(ws)?;
                periods += 1;
            }
            if done {
                break;
            }
        }

        println!("{}: re-indexed {} periods, {} orders", room, periods, orders);
    }

    println!("Indexes rebuilt");
    Ok(())
}
