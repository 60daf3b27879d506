use crate::aggregate::SentimentSummary;
use crate::config::env_parse;
use crate::domain::options::{OptionContract, OptionType};
use crate::domain::portfolio::{Position, WatchlistEntry};
use crate::domain::post::normalize_ticker;
use crate::domain::sentiment::{Direction, SentimentBreakdown, TickerMention};
use crate::domain::suggestion::{Action, OptionLeg, RankedSuggestions, Suggestion};
use crate::options::pricer::price_chain;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// What to do when the user already has exposure to the ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionPolicy {
    /// Never add to existing exposure, and lean toward unwinding it. A long
    /// position turns bullish into `hold` and bearish into a boosted `sell`; a short
    /// position turns bearish into `hold` and bullish into a boosted `buy` (cover).
    FavorExit,
    /// Positions are not consulted; every ticker is ranked as if flat.
    Ignore,
}

/// Net position in a ticker; quantities of the same ticker are summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exposure {
    Flat,
    Long,
    Short,
}

impl PositionPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "favor_exit" => Some(Self::FavorExit),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankerOptions {
    pub position_policy: PositionPolicy,
    /// Tickers with fewer contributing mentions produce no suggestion.
    pub min_mentions: u32,
    /// Without a position, a bearish stock signal yields `sell` only when enabled.
    pub allow_short_suggestions: bool,
    pub recency_half_life_hours: f64,
    /// Recency-weighted mention count at which the volume term reaches ~63%.
    pub volume_saturation: f64,
    pub option_expiry_days: i64,
}

impl Default for RankerOptions {
    fn default() -> Self {
        Self {
            position_policy: PositionPolicy::FavorExit,
            min_mentions: 1,
            allow_short_suggestions: false,
            recency_half_life_hours: 24.0,
            volume_saturation: 10.0,
            option_expiry_days: 14,
        }
    }
}

impl RankerOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Some(policy) = std::env::var("RANKER_POSITION_POLICY")
            .ok()
            .and_then(|s| PositionPolicy::parse(&s))
        {
            out.position_policy = policy;
        }
        if let Some(n) = env_parse::<u32>("RANKER_MIN_MENTIONS") {
            out.min_mentions = n.max(1);
        }
        if let Some(b) = env_parse::<bool>("RANKER_ALLOW_SHORTS") {
            out.allow_short_suggestions = b;
        }
        if let Some(h) = env_parse::<f64>("RANKER_RECENCY_HALF_LIFE_HOURS").filter(|h| *h > 0.0) {
            out.recency_half_life_hours = h;
        }

        out
    }
}

/// A classified mention together with when its post was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionEvidence {
    pub mention: TickerMention,
    pub timestamp: DateTime<Utc>,
}

pub struct RankInput<'a> {
    pub summary: &'a SentimentSummary,
    pub evidence: &'a [MentionEvidence],
    pub watchlist: &'a [WatchlistEntry],
    pub positions: &'a [Position],
    /// Real chains by ticker; anything missing is priced synthetically.
    pub live_chains: &'a BTreeMap<String, Vec<OptionContract>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SuggestionRanker {
    opts: RankerOptions,
}

impl SuggestionRanker {
    pub fn new(opts: RankerOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &RankerOptions {
        &self.opts
    }

    pub fn rank(&self, input: RankInput<'_>) -> RankedSuggestions {
        let spots = spot_prices(input.watchlist, input.positions);
        let exposure_by_ticker = exposures(input.positions);
        let live_chains = normalize_chains(input.live_chains);

        let mut out = RankedSuggestions::default();

        for (ticker, breakdown) in &input.summary.per_ticker {
            let direction = breakdown.overall;
            if direction == Direction::Neutral || breakdown.total() < self.opts.min_mentions {
                continue;
            }

            let evidence: Vec<&MentionEvidence> = input
                .evidence
                .iter()
                .filter(|e| &e.mention.ticker == ticker)
                .collect();
            let weighted_volume = self.recency_weighted_volume(&evidence, input.now);
            let base = base_confidence(breakdown, weighted_volume, self.opts.volume_saturation);
            let supporting: BTreeSet<String> = evidence
                .iter()
                .filter(|e| e.mention.direction == direction)
                .map(|e| e.mention.post_id.clone())
                .collect();
            let summary_line = format!(
                "{} of {} mentions {} (recency-weighted volume {:.1})",
                directional_count(breakdown, direction),
                breakdown.total(),
                direction_word(direction),
                weighted_volume
            );

            let exposure = exposure_by_ticker.get(ticker).copied().unwrap_or(Exposure::Flat);
            if let Some((action, confidence, note)) = self.stock_action(direction, exposure, base) {
                out.stock_suggestions.push(Suggestion {
                    id: suggestion_id(ticker, "stock", input.now),
                    ticker: ticker.clone(),
                    action,
                    confidence,
                    reason: format!("{summary_line}{note}"),
                    supporting_post_ids: supporting.clone(),
                    option: None,
                });
            }

            let Some(&spot) = spots.get(ticker) else {
                continue;
            };
            let option_confidence = to_score(base * 0.9);
            let leg = self.pick_option(
                ticker,
                direction,
                spot,
                option_confidence,
                live_chains.get(ticker).map(Vec::as_slice),
                input.now,
            );
            if let Some(leg) = leg {
                out.option_suggestions.push(Suggestion {
                    id: suggestion_id(ticker, "option", input.now),
                    ticker: ticker.clone(),
                    action: Action::Buy,
                    confidence: option_confidence,
                    reason: format!(
                        "{summary_line}; {} {:.0} {} targeting {:.2}",
                        match leg.option_type {
                            OptionType::Call => "call",
                            OptionType::Put => "put",
                        },
                        leg.strike,
                        leg.expiration,
                        leg.target_price
                    ),
                    supporting_post_ids: supporting,
                    option: Some(leg),
                });
            }
        }

        sort_ranked(&mut out.stock_suggestions);
        sort_ranked(&mut out.option_suggestions);
        out
    }

    fn recency_weighted_volume(&self, evidence: &[&MentionEvidence], now: DateTime<Utc>) -> f64 {
        evidence
            .iter()
            .map(|e| {
                let age_hours = (now - e.timestamp).num_seconds().max(0) as f64 / 3600.0;
                0.5_f64.powf(age_hours / self.opts.recency_half_life_hours)
            })
            .sum()
    }

    fn stock_action(
        &self,
        direction: Direction,
        exposure: Exposure,
        base: f64,
    ) -> Option<(Action, u8, &'static str)> {
        let exposure = match self.opts.position_policy {
            PositionPolicy::FavorExit => exposure,
            PositionPolicy::Ignore => Exposure::Flat,
        };
        match (direction, exposure) {
            (Direction::Bullish, Exposure::Long) => {
                Some((Action::Hold, to_score(base * 0.75), "; already held, not adding"))
            }
            (Direction::Bearish, Exposure::Long) => {
                Some((Action::Sell, to_score(base * 1.1), "; consider reducing position"))
            }
            (Direction::Bearish, Exposure::Short) => {
                Some((Action::Hold, to_score(base * 0.75), "; already short, not adding"))
            }
            (Direction::Bullish, Exposure::Short) => {
                Some((Action::Buy, to_score(base * 1.1), "; consider covering short"))
            }
            (Direction::Bullish, Exposure::Flat) => Some((Action::Buy, to_score(base), "")),
            (Direction::Bearish, Exposure::Flat) if self.opts.allow_short_suggestions => {
                Some((Action::Sell, to_score(base), ""))
            }
            (Direction::Bearish, Exposure::Flat) | (Direction::Neutral, _) => None,
        }
    }

    fn pick_option(
        &self,
        ticker: &str,
        direction: Direction,
        spot: f64,
        confidence: u8,
        live_chain: Option<&[&OptionContract]>,
        now: DateTime<Utc>,
    ) -> Option<OptionLeg> {
        let wanted = match direction {
            Direction::Bullish => OptionType::Call,
            Direction::Bearish => OptionType::Put,
            Direction::Neutral => return None,
        };

        // (strike, expiration, premium) candidates of the wanted type. A live chain
        // without that type falls through to the synthetic one.
        let mut candidates: Vec<(f64, NaiveDate, f64)> = live_chain
            .unwrap_or_default()
            .iter()
            .filter(|c| c.option_type == wanted)
            .map(|c| (c.strike, c.expiration, c.premium))
            .collect();
        if candidates.is_empty() {
            candidates = match price_chain(spot, now) {
                Ok(chain) => chain
                    .into_iter()
                    .filter(|c| c.option_type == wanted)
                    .map(|c| (c.strike, c.expiration, c.premium))
                    .collect(),
                Err(err) => {
                    tracing::debug!(ticker, error = %err, "cannot price synthetic chain");
                    return None;
                }
            };
        }

        let target_expiry = now.date_naive() + chrono::Duration::days(self.opts.option_expiry_days);
        let (strike, expiration, premium) = candidates.into_iter().min_by(|a, b| {
            let ka = ((a.1 - target_expiry).num_days().abs(), (a.0 - spot).abs());
            let kb = ((b.1 - target_expiry).num_days().abs(), (b.0 - spot).abs());
            ka.0.cmp(&kb.0)
                .then(ka.1.total_cmp(&kb.1))
                .then(a.0.total_cmp(&b.0))
        })?;

        let expected_move = 0.02 + 0.08 * f64::from(confidence) / 100.0;
        let target = match wanted {
            OptionType::Call => spot * (1.0 + expected_move),
            OptionType::Put => spot * (1.0 - expected_move),
        };

        Some(OptionLeg {
            strike,
            expiration,
            option_type: wanted,
            premium_estimate: premium,
            target_price: (target * 100.0).round() / 100.0,
        })
    }
}

/// 60% directional skew, 40% saturating recency-weighted volume, scaled to 0..100.
fn base_confidence(breakdown: &SentimentBreakdown, weighted_volume: f64, saturation: f64) -> f64 {
    let total = breakdown.total();
    if total == 0 {
        return 0.0;
    }
    let skew = f64::from(breakdown.bullish.abs_diff(breakdown.bearish)) / f64::from(total);
    let volume = 1.0 - (-weighted_volume / saturation.max(f64::EPSILON)).exp();
    100.0 * (0.6 * skew + 0.4 * volume)
}

fn to_score(x: f64) -> u8 {
    x.round().clamp(0.0, 100.0) as u8
}

fn directional_count(b: &SentimentBreakdown, d: Direction) -> u32 {
    match d {
        Direction::Bullish => b.bullish,
        Direction::Bearish => b.bearish,
        Direction::Neutral => b.neutral,
    }
}

fn direction_word(d: Direction) -> &'static str {
    match d {
        Direction::Bullish => "bullish",
        Direction::Bearish => "bearish",
        Direction::Neutral => "neutral",
    }
}

fn spot_prices(watchlist: &[WatchlistEntry], positions: &[Position]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for p in positions {
        if let Some(t) = normalize_ticker(&p.ticker) {
            if p.average_cost.is_finite() && p.average_cost > 0.0 {
                out.insert(t, p.average_cost);
            }
        }
    }
    // Watchlist quotes are fresher than cost basis.
    for w in watchlist {
        if let (Some(t), Some(price)) = (normalize_ticker(&w.ticker), w.last_price) {
            if price.is_finite() && price > 0.0 {
                out.insert(t, price);
            }
        }
    }
    out
}

fn exposures(positions: &[Position]) -> BTreeMap<String, Exposure> {
    let mut net: BTreeMap<String, f64> = BTreeMap::new();
    for p in positions.iter().filter(|p| p.quantity.is_finite()) {
        if let Some(t) = normalize_ticker(&p.ticker) {
            *net.entry(t).or_insert(0.0) += p.quantity;
        }
    }
    net.into_iter()
        .map(|(t, qty)| {
            let exposure = if qty > 0.0 {
                Exposure::Long
            } else if qty < 0.0 {
                Exposure::Short
            } else {
                Exposure::Flat
            };
            (t, exposure)
        })
        .collect()
}

/// Re-keys caller-supplied chains by normalized ticker, merging keys like `aapl`
/// and `$AAPL`. Unparseable keys are dropped.
fn normalize_chains(
    chains: &BTreeMap<String, Vec<OptionContract>>,
) -> BTreeMap<String, Vec<&OptionContract>> {
    let mut out: BTreeMap<String, Vec<&OptionContract>> = BTreeMap::new();
    for (key, chain) in chains {
        if let Some(t) = normalize_ticker(key) {
            out.entry(t).or_default().extend(chain.iter());
        }
    }
    out
}

fn suggestion_id(ticker: &str, kind: &str, now: DateTime<Utc>) -> Uuid {
    let name = format!("{ticker}:{kind}:{}", now.timestamp());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn sort_ranked(items: &mut [Suggestion]) {
    items.sort_by(|a, b| b.confidence.cmp(&a.confidence).then_with(|| a.ticker.cmp(&b.ticker)));
}
