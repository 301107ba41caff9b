pub mod nine;
pub mod price;
pub mod types;
pub mod wingo;

pub use nine::NineGame;
pub use types::*;
pub use wingo::WingoGame;

use crate::config::GameConfig;
use crate::errors::EngineResult;
use std::sync::Arc;

/// Per-game rules plugged into the shared round engine.
///
/// Scheduling and batch settlement are game independent and live in
/// `PeriodScheduler` and `SettlementExecutor`; a game only decides which
/// tickets are valid and what they pay.
pub trait RoundGame: Send + Sync {
    fn kind(&self) -> GameKind;

    fn validate_selection(&self, selection: &Selection) -> EngineResult<()>;

    /// Pure: identical inputs always yield the identical reward
    fn compute_reward(&self, outcome: u8, selection: &Selection, stake: Amount) -> Amount;

    /// Read-only view of the payout rules for room info
    fn payout_table(&self) -> serde_json::Value;
}

pub fn build_game(kind: GameKind, config: &GameConfig) -> Arc<dyn RoundGame> {
    match kind {
        GameKind::Wingo => Arc::new(WingoGame::new(config.wingo_payouts.clone())),
        GameKind::Nine => Arc::new(NineGame::new(config.nine_ratios_bps.clone())),
    }
}

/// `amount * bps / 10_000`, rounded down
pub(crate) fn apply_bps(amount: Amount, bps: u32) -> Amount {
    (i128::from(amount) * i128::from(bps) / 10_000) as Amount
}
