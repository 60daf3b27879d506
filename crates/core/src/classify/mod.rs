pub mod llm;
pub mod rules;

use crate::domain::post::Post;
use crate::domain::sentiment::{majority, Direction, MarketImpact, TickerMention};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub mentions: Vec<TickerMention>,
    pub market_impact: MarketImpact,
}

impl Classification {
    /// Unrelated or uncertain: contributes nothing to aggregation.
    pub fn none() -> Self {
        Self {
            mentions: Vec::new(),
            market_impact: MarketImpact::None,
        }
    }

    pub fn from_directions(post_id: &str, directions: BTreeMap<String, Direction>) -> Self {
        if directions.is_empty() {
            return Self::none();
        }

        let (mut bull, mut bear, mut neutral) = (0, 0, 0);
        let mentions = directions
            .into_iter()
            .map(|(ticker, direction)| {
                match direction {
                    Direction::Bullish => bull += 1,
                    Direction::Bearish => bear += 1,
                    Direction::Neutral => neutral += 1,
                }
                TickerMention {
                    post_id: post_id.to_string(),
                    ticker,
                    direction,
                }
            })
            .collect();

        Self {
            mentions,
            market_impact: majority(bull, bear, neutral).into(),
        }
    }
}

#[async_trait::async_trait]
pub trait ImpactClassifier: Send + Sync {
    fn classifier_name(&self) -> &'static str;

    /// Never fails: anything the classifier cannot decide comes back as
    /// [`Classification::none`].
    async fn classify(&self, post: &Post, watched: &BTreeSet<String>) -> Classification;
}
