//! Wingo: bet on the exact digit, its color group or its size.

use super::{apply_bps, RoundGame};
use crate::config::WingoPayouts;
use crate::errors::{EngineResult, ValidationError};
use crate::games::types::{ensure_digit, Amount, Color, GameKind, Selection, Size};
use serde_json::json;

pub struct WingoGame {
    payouts: WingoPayouts,
}

impl WingoGame {
    pub fn new(payouts: WingoPayouts) -> Self {
        Self { payouts }
    }

    /// Payout multiplier in basis points; 0 means the ticket lost
    pub fn multiplier_bps(&self, outcome: u8, selection: &Selection) -> u32 {
        let p = &self.payouts;
        match (selection, outcome) {
            (Selection::Digit(d), n) if *d == n => p.digit_bps,
            (Selection::Color(Color::Green), 1 | 3 | 7 | 9) => p.color_bps,
            (Selection::Color(Color::Green), 5) => p.color_half_bps,
            (Selection::Color(Color::Red), 2 | 4 | 6 | 8) => p.color_bps,
            (Selection::Color(Color::Red), 0) => p.color_half_bps,
            (Selection::Color(Color::Violet), 0 | 5) => p.violet_bps,
            (Selection::Size(Size::Big), 5..=9) => p.size_bps,
            (Selection::Size(Size::Small), 0..=4) => p.size_bps,
            _ => 0,
        }
    }
}

impl RoundGame for WingoGame {
    fn kind(&self) -> GameKind {
        GameKind::Wingo
    }

    fn validate_selection(&self, selection: &Selection) -> EngineResult<()> {
        match selection {
            Selection::Digit(d) => ensure_digit(*d).map(|_| ()),
            Selection::Color(_) | Selection::Size(_) => Ok(()),
            Selection::Exclude(_) => Err(ValidationError::InvalidSelection(
                "wingo does not accept exclusion sets".to_string(),
            )
            .into()),
        }
    }

    fn compute_reward(&self, outcome: u8, selection: &Selection, stake: Amount) -> Amount {
        apply_bps(stake, self.multiplier_bps(outcome, selection))
    }

    fn payout_table(&self) -> serde_json::Value {
        json!({
            "digit_bps": self.payouts.digit_bps,
            "color_bps": self.payouts.color_bps,
            "color_half_bps": self.payouts.color_half_bps,
            "violet_bps": self.payouts.violet_bps,
            "size_bps": self.payouts.size_bps,
            "green": [1, 3, 5, 7, 9],
            "red": [0, 2, 4, 6, 8],
            "violet": [0, 5],
            "big": [5, 6, 7, 8, 9],
            "small": [0, 1, 2, 3, 4],
        })
    }
}
