use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn opposite(self) -> Self {
        match self {
            Self::Call => Self::Put,
            Self::Put => Self::Call,
        }
    }
}

/// One row of an option chain. For synthetic chains `volume`, `open_interest` and
/// `implied_volatility` are display filler and say nothing about real liquidity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub ticker: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub premium: f64,
    pub volume: u32,
    pub open_interest: u32,
    pub implied_volatility: f64,
}
