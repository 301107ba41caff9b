use crate::errors::{EngineResult, ValidationError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Money in minor units
pub type Amount = i64;

/// Supported round games
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Wingo,
    Nine,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Wingo => write!(f, "wingo"),
            GameKind::Nine => write!(f, "nine"),
        }
    }
}

impl FromStr for GameKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wingo" => Ok(GameKind::Wingo),
            "nine" => Ok(GameKind::Nine),
            other => Err(ValidationError::UnknownBetType(other.to_string())),
        }
    }
}

/// A room: one game played on a fixed round interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BetType {
    Wingo1,
    Wingo3,
    Wingo5,
    Wingo10,
    Nine1,
    Nine3,
    Nine5,
}

impl BetType {
    pub const ALL: [BetType; 7] = [
        BetType::Wingo1,
        BetType::Wingo3,
        BetType::Wingo5,
        BetType::Wingo10,
        BetType::Nine1,
        BetType::Nine3,
        BetType::Nine5,
    ];

    pub fn game(&self) -> GameKind {
        match self {
            BetType::Wingo1 | BetType::Wingo3 | BetType::Wingo5 | BetType::Wingo10 => GameKind::Wingo,
            BetType::Nine1 | BetType::Nine3 | BetType::Nine5 => GameKind::Nine,
        }
    }

    /// Round length; always divides a day
    pub fn interval_secs(&self) -> u32 {
        match self {
            BetType::Wingo1 | BetType::Nine1 => 60,
            BetType::Wingo3 | BetType::Nine3 => 180,
            BetType::Wingo5 | BetType::Nine5 => 300,
            BetType::Wingo10 => 600,
        }
    }

    /// Number of rounds from midnight to midnight
    pub fn slots_per_day(&self) -> u32 {
        86_400 / self.interval_secs()
    }

    pub fn code(&self) -> &'static str {
        match self {
            BetType::Wingo1 => "wingo1",
            BetType::Wingo3 => "wingo3",
            BetType::Wingo5 => "wingo5",
            BetType::Wingo10 => "wingo10",
            BetType::Nine1 => "nine1",
            BetType::Nine3 => "nine3",
            BetType::Nine5 => "nine5",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for BetType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BetType::ALL
            .iter()
            .copied()
            .find(|b| b.code() == s)
            .ok_or_else(|| ValidationError::UnknownBetType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Red,
    Violet,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    Big,
    Small,
}

/// What a ticket wagers on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Selection {
    Digit(u8),
    Color(Color),
    Size(Size),
    /// Nine: the bet loses if the drawn digit is in the set
    Exclude(BTreeSet<u8>),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Digit(d) => write!(f, "digit:{}", d),
            Selection::Color(c) => write!(f, "color:{:?}", c),
            Selection::Size(s) => write!(f, "size:{:?}", s),
            Selection::Exclude(set) => {
                let digits: Vec<String> = set.iter().map(|d| d.to_string()).collect();
                write!(f, "exclude:{}", digits.join(","))
            }
        }
    }
}

pub fn ensure_digit(d: u8) -> EngineResult<u8> {
    if d > 9 {
        return Err(ValidationError::InvalidDigit(d).into());
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeriodStatus {
    Created,
    Settled,
}

/// `YYYYMMDD` followed by the zero-padded daily index
pub fn format_period_id(date: NaiveDate, index: u32) -> String {
    format!("{}{:04}", date.format("%Y%m%d"), index)
}

/// One round of a room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Period {
    pub period_id: String,
    pub bet_type: BetType,
    pub period_date: NaiveDate,
    pub period_index: u32,
    pub preset_number: u8,
    /// `None` until drawn; the outcome then falls back to the preset
    pub number: Option<u8>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: PeriodStatus,
    pub bet_amount: Amount,
    pub reward_amount: Amount,
    pub fee: Amount,
    pub profit: Amount,
    pub player_count: u32,
    pub order_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Period {
    pub fn outcome(&self) -> u8 {
        self.number.unwrap_or(self.preset_number)
    }

    pub fn is_settled(&self) -> bool {
        self.status == PeriodStatus::Settled
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Last instant at which a bet is accepted
    pub fn bet_deadline(&self, close_secs: u32) -> DateTime<Utc> {
        self.end_time - chrono::Duration::seconds(i64::from(close_secs))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Settled,
    Cancelled,
}

/// One bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub uid: u64,
    pub period_id: String,
    pub bet_type: BetType,
    pub selection: Selection,
    pub stake: Amount,
    pub fee: Amount,
    /// Written once at settlement
    pub reward_amount: Option<Amount>,
    pub status: OrderStatus,
    /// Cash right after the stake debit
    pub balance_snapshot: Amount,
    #[serde(default)]
    pub promoter_code: Option<String>,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Created
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub uid: u64,
    pub cash: Amount,
    #[serde(default)]
    pub promoter_code: Option<String>,
    #[serde(default)]
    pub security_level: u8,
    /// Bumped on every committed mutation
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// An order waiting for its reward to be credited, with the drawn outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingSettlement {
    pub order: Order,
    pub outcome: u8,
}

/// Incoming bet request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRequest {
    pub uid: u64,
    pub bet_type: BetType,
    pub selection: Selection,
    pub stake: Amount,
    /// Client-chosen key; retries with the same key place one order
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_type_codes_round_trip() {
        for bet_type in BetType::ALL {
            assert_eq!(bet_type.code().parse::<BetType>().unwrap(), bet_type);
            assert_eq!(86_400 % bet_type.interval_secs(), 0);
        }
        assert!("wingo7".parse::<BetType>().is_err());
        assert_eq!(BetType::Wingo1.slots_per_day(), 1440);
        assert_eq!(BetType::Wingo10.slots_per_day(), 144);
    }

    #[test]
    fn test_period_id_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(format_period_id(date, 1), "202603070001");
        assert_eq!(format_period_id(date, 1440), "202603071440");
    }

    #[test]
    fn test_selection_json_shape() {
        let sel = Selection::Exclude([1, 7].into_iter().collect());
        let json = serde_json::to_string(&sel).unwrap();
        assert_eq!(json, r#"{"kind":"exclude","value":[1,7]}"#);

        let color: Selection = serde_json::from_str(r#"{"kind":"color","value":"violet"}"#).unwrap();
        assert_eq!(color, Selection::Color(Color::Violet));
    }
}
