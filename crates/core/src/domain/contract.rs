use crate::domain::post::{normalize_ticker, Author, Engagement, ImpactLabel, Post, TaggedTicker};
use crate::domain::sentiment::Direction;
use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Raw shape the LLM emits when asked to surface recent posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmPostBatch {
    pub posts: Vec<LlmPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmPost {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub retweets: Option<u64>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub impact: Option<ImpactLabel>,
    #[serde(default)]
    pub tickers: Vec<LlmTickerTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTickerTag {
    pub ticker: String,
    #[serde(default)]
    pub direction: Option<Direction>,
}

/// Raw shape the LLM emits when classifying a single post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmClassification {
    pub mentions: Vec<LlmTickerTag>,
    pub confidence: f64,
}

impl LlmPostBatch {
    pub fn validate_and_into_posts(
        self,
        max_count: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Post>> {
        let mut seen_ids = BTreeSet::<String>::new();
        let mut out = Vec::with_capacity(self.posts.len().min(max_count));
        for (idx, post) in self.posts.into_iter().take(max_count).enumerate() {
            let post = post.validate_and_into_post(idx, now)?;
            ensure!(seen_ids.insert(post.id.clone()), "duplicate post id: {}", post.id);
            out.push(post);
        }
        Ok(out)
    }
}

impl LlmPost {
    fn validate_and_into_post(self, idx: usize, now: DateTime<Utc>) -> anyhow::Result<Post> {
        let username = self.username.trim().trim_start_matches('@').to_string();
        ensure!(!username.is_empty(), "username must be non-empty (post #{idx})");

        let content = self.content.trim().to_string();
        ensure!(!content.is_empty(), "content must be non-empty (post #{idx})");

        let id = self
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("inferred-{username}-{idx}"));

        let timestamp = self.timestamp.unwrap_or(now);
        ensure!(
            timestamp <= now + chrono::Duration::minutes(5),
            "timestamp is in the future: {timestamp}"
        );

        let engagement = Engagement {
            likes: self.likes.unwrap_or(0),
            retweets: self.retweets.unwrap_or(0),
        };

        let tagged_tickers = self
            .tickers
            .into_iter()
            .filter_map(|t| {
                normalize_ticker(&t.ticker).map(|ticker| TaggedTicker {
                    ticker,
                    direction: t.direction,
                })
            })
            .collect();

        Ok(Post {
            id,
            author: Author {
                display_name: self
                    .display_name
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| username.clone()),
                username,
                verified: self.verified.unwrap_or(false),
            },
            content,
            timestamp,
            engagement,
            attached_image_urls: self
                .image_urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| u.starts_with("http"))
                .collect(),
            impact_label: self
                .impact
                .unwrap_or_else(|| ImpactLabel::from_engagement(engagement)),
            tagged_tickers,
        })
    }
}

impl LlmClassification {
    /// Returns `None` when the classifier is not confident enough; callers must then
    /// treat the post as unrelated rather than guess a direction.
    pub fn validate_and_into_directions(
        self,
        watched: &BTreeSet<String>,
        min_confidence: f64,
    ) -> anyhow::Result<Option<BTreeMap<String, Direction>>> {
        ensure!(
            (0.0..=1.0).contains(&self.confidence),
            "confidence must be between 0 and 1 (got {})",
            self.confidence
        );
        if self.confidence < min_confidence {
            return Ok(None);
        }

        let mut out = BTreeMap::new();
        for tag in self.mentions {
            let Some(ticker) = normalize_ticker(&tag.ticker) else {
                continue;
            };
            if !watched.contains(&ticker) {
                continue;
            }
            // Mentions without a direction are uncertain; skip rather than guess.
            if let Some(direction) = tag.direction {
                out.insert(ticker, direction);
            }
        }
        Ok(Some(out))
    }
}
