use crate::domain::sentiment::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized social post. Both acquisition paths produce exactly this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: Author,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub engagement: Engagement,
    #[serde(default)]
    pub attached_image_urls: Vec<String>,
    pub impact_label: ImpactLabel,

    /// Tickers the source itself tagged (cashtag entities, LLM extraction).
    #[serde(default)]
    pub tagged_tickers: Vec<TaggedTicker>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: u64,
    pub retweets: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedTicker {
    pub ticker: String,
    #[serde(default)]
    pub direction: Option<Direction>,
}

/// Source-assigned label for how market-moving a post looks. Informational only;
/// the classifier decides what actually counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLabel {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl ImpactLabel {
    /// Platform posts carry no label, so derive one from engagement.
    pub fn from_engagement(engagement: Engagement) -> Self {
        let score = engagement
            .likes
            .saturating_add(engagement.retweets.saturating_mul(3));
        match score {
            0..=99 => Self::Low,
            100..=4_999 => Self::Medium,
            _ => Self::High,
        }
    }
}

/// Upper-cases and strips a leading `$` so `$aapl`, `AAPL` and ` aapl ` compare equal.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let t = raw.trim().trim_start_matches('$').to_ascii_uppercase();
    let valid = !t.is_empty()
        && t.len() <= 6
        && t.chars().all(|c| c.is_ascii_alphabetic() || c == '.');
    valid.then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ticker_strips_cashtag_and_case() {
        assert_eq!(normalize_ticker("$aapl"), Some("AAPL".to_string()));
        assert_eq!(normalize_ticker(" BRK.B "), Some("BRK.B".to_string()));
        assert_eq!(normalize_ticker("$"), None);
        assert_eq!(normalize_ticker("12345"), None);
        assert_eq!(normalize_ticker("TOOLONGX"), None);
    }

    #[test]
    fn impact_label_scales_with_engagement() {
        let low = Engagement { likes: 10, retweets: 2 };
        let mid = Engagement { likes: 400, retweets: 50 };
        let high = Engagement { likes: 9_000, retweets: 1_000 };
        assert_eq!(ImpactLabel::from_engagement(low), ImpactLabel::Low);
        assert_eq!(ImpactLabel::from_engagement(mid), ImpactLabel::Medium);
        assert_eq!(ImpactLabel::from_engagement(high), ImpactLabel::High);
    }

    #[test]
    fn impact_label_saturates_on_huge_counts() {
        let huge = Engagement { likes: 1, retweets: u64::MAX / 2 };
        assert_eq!(ImpactLabel::from_engagement(huge), ImpactLabel::High);
        let max = Engagement { likes: u64::MAX, retweets: u64::MAX };
        assert_eq!(ImpactLabel::from_engagement(max), ImpactLabel::High);
    }
}
