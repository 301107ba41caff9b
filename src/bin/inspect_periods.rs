//! Dump recent periods of a store and check them for consistency:
//! indexes on a date run 1, 2, 3 ... and a settled period's `bet_amount`
//! equals the stakes of its non-cancelled orders.

use clap::Parser;
use roundbet::games::types::{BetType, OrderStatus, Period};
use roundbet::round_store::RoundStore;
use roundbet::storage::{KvStore, RocksStore, ScanDirection};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "inspect_periods")]
#[command(about = "Inspect and verify stored betting periods")]
struct Args {
    /// Path to the RocksDB directory
    #[arg(short, long, default_value = "./roundbet_data")]
    db_path: PathBuf,

    /// Only this room (wingo1, nine3, ...)
    #[arg(short, long)]
    room: Option<BetType>,

    /// Periods to show per room, newest first
    #[arg(short, long, default_value = "10")]
    limit: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if !args.db_path.exists() {
        println!("No data found at {:?}", args.db_path);
        return Ok(());
    }

    let kv: Arc<dyn KvStore> = Arc::new(RocksStore::new(&args.db_path)?);
    let store = RoundStore::new(kv.clone());

    let rooms: Vec<BetType> = match args.room {
        Some(room) => vec![room],
        None => BetType::ALL.to_vec(),
    };

    let mut problems = 0usize;
    for room in rooms {
        let prefix = format!("period:{}:", room);
        let rows = kv.scan_prefix(prefix.as_bytes(), None, args.limit.max(1), ScanDirection::Reverse)?;
        if rows.is_empty() {
            continue;
        }

        println!("Room {}", room);
        println!("{}", "=".repeat(60));

        let mut newer: Option<Period> = None;
        for (key, value) in rows {
            let period: Period = match serde_json::from_slice(&value) {
                Ok(p) => p,
                Err(e) => {
                    println!("   Failed to decode {}: {}", String::from_utf8_lossy(&key), e);
                    problems += 1;
                    continue;
                }
            };

            println!(
                "   {} [{:?}] number={} bets={} rewards={} orders={} players={} price={}",
                period.period_id,
                period.status,
                period.number.map_or("-".to_string(), |n| n.to_string()),
                period.bet_amount,
                period.reward_amount,
                period.order_count,
                period.player_count,
                period.price.as_deref().unwrap_or("-"),
            );

            if let Some(next) = &newer {
                if next.period_date == period.period_date && next.period_index != period.period_index + 1 {
                    println!(
                        "   Index gap: {} follows {}",
                        next.period_id, period.period_id
                    );
                    problems += 1;
                }
            }

            if period.is_settled() {
                let orders = store.period_orders(room, &period.period_id)?;
                let staked: i64 = orders
                    .iter()
                    .filter(|o| o.status != OrderStatus::Cancelled)
                    .map(|o| o.stake)
                    .sum();
                let open = orders.iter().filter(|o| o.is_open()).count();
                if staked != period.bet_amount {
                    println!(
                        "   bet_amount {} != staked {} for {}",
                        period.bet_amount, staked, period.period_id
                    );
                    problems += 1;
                }
                if open > 0 {
                    println!("   {} order(s) still open in settled {}", open, period.period_id);
                }
            }

            newer = Some(period);
        }
        println!();
    }

    if problems == 0 {
        println!("All checked periods are consistent");
    } else {
        println!("{} problem(s) found", problems);
    }
    Ok(())
}
