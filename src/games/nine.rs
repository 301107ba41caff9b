//! Nine: exclude a set of digits; any other draw wins.

use super::{apply_bps, RoundGame};
use crate::errors::{EngineResult, ValidationError};
use crate::games::types::{ensure_digit, Amount, GameKind, Selection};
use serde_json::json;

pub struct NineGame {
    /// Profit ratio in bps, indexed by exclusion-set length - 1
    ratios_bps: Vec<u32>,
}

impl NineGame {
    pub fn new(ratios_bps: Vec<u32>) -> Self {
        Self { ratios_bps }
    }

    fn ratio_for(&self, len: usize) -> u32 {
        len.checked_sub(1)
            .and_then(|i| self.ratios_bps.get(i))
            .copied()
            .unwrap_or(0)
    }
}

impl RoundGame for NineGame {
    fn kind(&self) -> GameKind {
        GameKind::Nine
    }

    fn validate_selection(&self, selection: &Selection) -> EngineResult<()> {
        let set = match selection {
            Selection::Exclude(set) => set,
            _ => {
                return Err(ValidationError::InvalidSelection(
                    "nine only accepts exclusion sets".to_string(),
                )
                .into())
            }
        };
        if set.is_empty() || set.len() > 9 {
            return Err(ValidationError::InvalidSelection(format!(
                "exclusion set must hold 1 to 9 digits, got {}",
                set.len()
            ))
            .into());
        }
        for d in set {
            ensure_digit(*d)?;
        }
        Ok(())
    }

    fn compute_reward(&self, outcome: u8, selection: &Selection, stake: Amount) -> Amount {
        match selection {
            Selection::Exclude(set) if !set.is_empty() && !set.contains(&outcome) => {
                stake + apply_bps(stake, self.ratio_for(set.len()))
            }
            _ => 0,
        }
    }

    fn payout_table(&self) -> serde_json::Value {
        let rows: Vec<_> = self
            .ratios_bps
            .iter()
            .enumerate()
            .map(|(i, bps)| json!({ "excluded": i + 1, "ratio_bps": bps }))
            .collect();
        json!({ "ratios": rows })
    }
}
