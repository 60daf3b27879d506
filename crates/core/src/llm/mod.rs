pub mod anthropic;
pub mod error;
pub mod json;

use crate::domain::contract::LlmClassification;
use crate::domain::post::Post;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct InferPostsInput {
    /// Tickers and/or usernames to look for.
    pub queries: Vec<String>,
    pub max_count: usize,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
        }
    }
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn infer_posts(&self, input: InferPostsInput) -> anyhow::Result<Vec<Post>>;

    async fn classify_post(
        &self,
        post: &Post,
        watched: &BTreeSet<String>,
    ) -> anyhow::Result<LlmClassification>;
}
