use crate::classify::{Classification, ImpactClassifier};
use crate::domain::post::{normalize_ticker, Post};
use crate::domain::sentiment::Direction;
use std::collections::{BTreeMap, BTreeSet};

const BULLISH_TERMS: &[&str] = &[
    "beat", "beats", "breakout", "bullish", "buy", "buying", "calls", "crushing", "growth",
    "higher", "long", "moon", "outperform", "rally", "record", "rip", "ripping", "squeeze",
    "strong", "surge", "surging", "upgrade", "upgraded",
];

const BEARISH_TERMS: &[&str] = &[
    "bearish", "crash", "cut", "downgrade", "downgraded", "dump", "fraud", "lawsuit", "lower",
    "miss", "misses", "plunge", "puts", "recall", "sell", "selling", "short", "tank", "weak",
    "underperform",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "isn't", "aren't", "don't"];

// A negator only reaches a lexicon term this many tokens ahead ("not very bullish").
const NEGATION_WINDOW: usize = 2;

const CLAUSE_JOINERS: &[&str] = &[" but ", " while ", " whereas ", " although "];

/// Deterministic keyword classifier.
///
/// Each ticker is scored on the clauses that reference it, so "$AAPL strong but
/// $TSLA weak" is bullish on AAPL and bearish on TSLA. A direction supplied by the
/// source's own tagging takes precedence over the lexicon.
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_sync(&self, post: &Post, watched: &BTreeSet<String>) -> Classification {
        let clauses = split_clauses(&post.content);
        let mut scores: BTreeMap<String, i32> = BTreeMap::new();

        for clause in &clauses {
            let tokens = tokenize(clause);
            let referenced: BTreeSet<String> = tokens
                .iter()
                .filter_map(|t| ticker_reference(t, watched))
                .collect();
            if referenced.is_empty() {
                continue;
            }
            let score = lexicon_score(&tokens);
            for ticker in referenced {
                *scores.entry(ticker).or_insert(0) += score;
            }
        }

        let mut directions: BTreeMap<String, Direction> = scores
            .into_iter()
            .map(|(ticker, score)| (ticker, direction_of(score)))
            .collect();

        let whole_post_score = || lexicon_score(&tokenize(&post.content));
        for tag in &post.tagged_tickers {
            if !watched.contains(&tag.ticker) {
                continue;
            }
            match tag.direction {
                Some(direction) => {
                    directions.insert(tag.ticker.clone(), direction);
                }
                None => {
                    directions
                        .entry(tag.ticker.clone())
                        .or_insert_with(|| direction_of(whole_post_score()));
                }
            }
        }

        Classification::from_directions(&post.id, directions)
    }
}

#[async_trait::async_trait]
impl ImpactClassifier for RuleClassifier {
    fn classifier_name(&self) -> &'static str {
        "rules"
    }

    async fn classify(&self, post: &Post, watched: &BTreeSet<String>) -> Classification {
        self.classify_sync(post, watched)
    }
}

fn direction_of(score: i32) -> Direction {
    match score.signum() {
        1 => Direction::Bullish,
        -1 => Direction::Bearish,
        _ => Direction::Neutral,
    }
}

fn split_clauses(content: &str) -> Vec<String> {
    let mut text = format!(" {} ", content.replace(". ", "\n"));
    for joiner in CLAUSE_JOINERS {
        text = text.replace(joiner, "\n");
    }
    text.split(['\n', '!', '?', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn tokenize(clause: &str) -> Vec<&str> {
    clause
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '$' || c == '.' || c == '\''))
                .trim_end_matches('.')
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// `$aapl` always counts; a bare `AAPL` only when it is upper-case in the text.
fn ticker_reference(token: &str, watched: &BTreeSet<String>) -> Option<String> {
    let candidate = if token.starts_with('$') {
        normalize_ticker(token)?
    } else if token.len() >= 2 && token.chars().all(|c| c.is_ascii_uppercase() || c == '.') {
        token.to_string()
    } else {
        return None;
    };
    watched.contains(&candidate).then_some(candidate)
}

fn lexicon_score(tokens: &[&str]) -> i32 {
    let mut score = 0;
    let mut negate_left = 0usize;
    for token in tokens {
        let word = token.to_ascii_lowercase();
        if NEGATIONS.contains(&word.as_str()) {
            negate_left = NEGATION_WINDOW;
            continue;
        }
        let polarity = if BULLISH_TERMS.contains(&word.as_str()) {
            1
        } else if BEARISH_TERMS.contains(&word.as_str()) {
            -1
        } else {
            0
        };
        if polarity != 0 {
            score += if negate_left > 0 { -polarity } else { polarity };
            negate_left = 0;
        } else {
            negate_left = negate_left.saturating_sub(1);
        }
    }
    score
}
