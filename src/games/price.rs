//! Cosmetic "market price" shown next to a settled period.

use crate::games::types::Amount;
use rand::Rng;

/// `prefix` + two digits from the reward/stake ratio + drawn digit.
///
/// With no stake in the round the middle digits are random.
pub fn display_price<R: Rng + ?Sized>(
    prefix: &str,
    bet_amount: Amount,
    reward_amount: Amount,
    number: u8,
    rng: &mut R,
) -> String {
    let middle = if bet_amount > 0 {
        ((i128::from(reward_amount) * 100 / i128::from(bet_amount)).rem_euclid(100)) as u8
    } else {
        rng.gen_range(0..100)
    };
    format!("{}{:02}{}", prefix, middle, number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_price_from_ratio() {
        let mut rng = StdRng::seed_from_u64(1);
        // 1_250 / 1_000 = 1.25 -> "25"
        assert_eq!(display_price("84", 1_000, 1_250, 3, &mut rng), "84253");
        assert_eq!(display_price("84", 1_000, 0, 0, &mut rng), "84000");
    }

    #[test]
    fn test_price_without_stake_is_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);
        let price = display_price("84", 0, 0, 9, &mut rng);
        assert_eq!(price.len(), 5);
        assert!(price.starts_with("84"));
        assert!(price.ends_with('9'));
    }
}
