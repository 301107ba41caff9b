//! Roundbet - round-based betting and settlement engine
//!
//! Fixed-interval rounds per room, pre-generated outcome digits, wallet-locked
//! order intake, debounced batch settlement and a recovery scanner that
//! re-drives anything the fast path dropped.

pub mod accumulator;
pub mod api;
pub mod area_limit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod factory;
pub mod games;
pub mod identity;
pub mod intake;
pub mod ledger;
pub mod lock;
pub mod metrics;
pub mod recovery;
pub mod round_store;
pub mod scheduler;
pub mod storage;
pub mod wallet;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, EngineConfig};
pub use engine::RoundEngine;
pub use errors::{EngineError, EngineResult};
pub use factory::{Platform, PlatformFactory};
pub use games::types::{BetRequest, BetType, GameKind, Order, Period, Selection};
pub use storage::{KvStore, MemoryStore, RocksStore};
