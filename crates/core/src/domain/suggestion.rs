use crate::domain::options::OptionType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub ticker: String,
    pub action: Action,
    /// 0..=100
    pub confidence: u8,
    pub reason: String,
    pub supporting_post_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<OptionLeg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub strike: f64,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub premium_estimate: f64,
    pub target_price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedSuggestions {
    pub stock_suggestions: Vec<Suggestion>,
    pub option_suggestions: Vec<Suggestion>,
}
