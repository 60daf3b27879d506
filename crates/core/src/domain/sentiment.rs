use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

/// Per-post classification outcome. `None` means the post is unrelated to the
/// watch-set and is dropped before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketImpact {
    Bullish,
    Bearish,
    Neutral,
    None,
}

impl From<Direction> for MarketImpact {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Bullish => Self::Bullish,
            Direction::Bearish => Self::Bearish,
            Direction::Neutral => Self::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMention {
    pub post_id: String,
    pub ticker: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentBreakdown {
    pub bullish: u32,
    pub bearish: u32,
    pub neutral: u32,
    pub overall: Direction,
    pub last_updated: DateTime<Utc>,
}

impl SentimentBreakdown {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self::from_counts(0, 0, 0, now)
    }

    pub fn from_counts(bullish: u32, bearish: u32, neutral: u32, now: DateTime<Utc>) -> Self {
        Self {
            bullish,
            bearish,
            neutral,
            overall: majority(bullish, bearish, neutral),
            last_updated: now,
        }
    }

    pub fn record(&mut self, direction: Direction) {
        match direction {
            Direction::Bullish => self.bullish += 1,
            Direction::Bearish => self.bearish += 1,
            Direction::Neutral => self.neutral += 1,
        }
        self.overall = majority(self.bullish, self.bearish, self.neutral);
    }

    pub fn total(&self) -> u32 {
        self.bullish + self.bearish + self.neutral
    }
}

/// Label with the strictly largest count. Any tie for the top spot is neutral.
pub fn majority(bullish: u32, bearish: u32, neutral: u32) -> Direction {
    if bullish > bearish && bullish > neutral {
        Direction::Bullish
    } else if bearish > bullish && bearish > neutral {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_majority_wins() {
        assert_eq!(majority(2, 1, 0), Direction::Bullish);
        assert_eq!(majority(0, 3, 2), Direction::Bearish);
        assert_eq!(majority(1, 1, 5), Direction::Neutral);
    }

    #[test]
    fn ties_resolve_to_neutral() {
        assert_eq!(majority(3, 3, 1), Direction::Neutral);
        assert_eq!(majority(3, 0, 3), Direction::Neutral);
        assert_eq!(majority(0, 2, 2), Direction::Neutral);
        assert_eq!(majority(0, 0, 0), Direction::Neutral);
    }

    #[test]
    fn record_keeps_overall_in_sync() {
        let mut b = SentimentBreakdown::empty(Utc::now());
        b.record(Direction::Bearish);
        assert_eq!(b.overall, Direction::Bearish);
        b.record(Direction::Bullish);
        assert_eq!(b.overall, Direction::Neutral);
        b.record(Direction::Bullish);
        assert_eq!(b.overall, Direction::Bullish);
        assert_eq!(b.total(), 3);
    }
}
