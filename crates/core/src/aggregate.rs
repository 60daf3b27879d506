use crate::domain::sentiment::{SentimentBreakdown, TickerMention};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub per_ticker: BTreeMap<String, SentimentBreakdown>,
    pub market: SentimentBreakdown,
}

/// Folds mentions into one breakdown per scope ticker plus a market-wide one.
///
/// The market breakdown counts every in-scope mention, so heavily discussed names
/// weigh more than quiet ones. Mentions outside `scope` are ignored entirely.
pub fn aggregate(
    mentions: &[TickerMention],
    scope: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> SentimentSummary {
    let mut per_ticker: BTreeMap<String, SentimentBreakdown> = scope
        .iter()
        .map(|t| (t.clone(), SentimentBreakdown::empty(now)))
        .collect();
    let mut market = SentimentBreakdown::empty(now);

    for mention in mentions {
        let Some(breakdown) = per_ticker.get_mut(&mention.ticker) else {
            continue;
        };
        breakdown.record(mention.direction);
        market.record(mention.direction);
    }

    SentimentSummary { per_ticker, market }
}
