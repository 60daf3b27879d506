use crate::classify::{Classification, ImpactClassifier};
use crate::config::env_parse;
use crate::domain::post::Post;
use crate::llm::LlmClient;
use std::collections::BTreeSet;
use std::sync::Arc;

const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

/// Classifier backed by the LLM. Not deterministic; errors and low-confidence
/// answers come back as `none` instead of a guessed direction.
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
    min_confidence: f64,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let min_confidence = env_parse::<f64>("CLASSIFIER_MIN_CONFIDENCE")
            .filter(|c| (0.0..=1.0).contains(c))
            .unwrap_or(DEFAULT_MIN_CONFIDENCE);
        Self {
            llm,
            min_confidence,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

#[async_trait::async_trait]
impl ImpactClassifier for LlmClassifier {
    fn classifier_name(&self) -> &'static str {
        "llm"
    }

    async fn classify(&self, post: &Post, watched: &BTreeSet<String>) -> Classification {
        let raw = match self.llm.classify_post(post, watched).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(post_id = %post.id, error = %err, "classification failed; excluding post");
                return Classification::none();
            }
        };

        let mut directions = match raw.validate_and_into_directions(watched, self.min_confidence) {
            Ok(Some(directions)) => directions,
            Ok(None) => {
                tracing::debug!(post_id = %post.id, "classification uncertain; excluding post");
                return Classification::none();
            }
            Err(err) => {
                tracing::warn!(post_id = %post.id, error = %err, "classification invalid; excluding post");
                return Classification::none();
            }
        };

        for tag in &post.tagged_tickers {
            if let Some(direction) = tag.direction {
                if watched.contains(&tag.ticker) {
                    directions.insert(tag.ticker.clone(), direction);
                }
            }
        }

        Classification::from_directions(&post.id, directions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::{LlmClassification, LlmTickerTag};
    use crate::domain::sentiment::{Direction, MarketImpact};
    use crate::llm::{InferPostsInput, Provider};
    use crate::testutil::post;

    struct FixedLlm(Option<LlmClassification>);

    #[async_trait::async_trait]
    impl LlmClient for FixedLlm {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn infer_posts(&self, _input: InferPostsInput) -> anyhow::Result<Vec<Post>> {
            Ok(Vec::new())
        }

        async fn classify_post(
            &self,
            _post: &Post,
            _watched: &BTreeSet<String>,
        ) -> anyhow::Result<LlmClassification> {
            self.0.clone().ok_or_else(|| anyhow::anyhow!("provider unavailable"))
        }
    }

    fn tag(ticker: &str, direction: Direction) -> LlmTickerTag {
        LlmTickerTag {
            ticker: ticker.to_string(),
            direction: Some(direction),
        }
    }

    fn watched() -> BTreeSet<String> {
        ["AAPL".to_string(), "TSLA".to_string()].into()
    }

    #[tokio::test]
    async fn confident_answer_becomes_mentions() {
        let llm = FixedLlm(Some(LlmClassification {
            mentions: vec![tag("AAPL", Direction::Bullish), tag("TSLA", Direction::Bearish)],
            confidence: 0.9,
        }));
        let c = LlmClassifier::new(Arc::new(llm))
            .with_min_confidence(0.6)
            .classify(&post("1", "whatever", &[]), &watched())
            .await;
        assert_eq!(c.mentions.len(), 2);
        assert_eq!(c.market_impact, MarketImpact::Neutral);
    }

    #[tokio::test]
    async fn low_confidence_is_excluded_not_guessed() {
        let llm = FixedLlm(Some(LlmClassification {
            mentions: vec![tag("AAPL", Direction::Bullish)],
            confidence: 0.2,
        }));
        let c = LlmClassifier::new(Arc::new(llm))
            .with_min_confidence(0.6)
            .classify(&post("1", "$AAPL maybe?", &[]), &watched())
            .await;
        assert_eq!(c, Classification::none());
    }

    #[tokio::test]
    async fn provider_error_is_excluded() {
        let c = LlmClassifier::new(Arc::new(FixedLlm(None)))
            .classify(&post("1", "$AAPL strong", &[]), &watched())
            .await;
        assert_eq!(c.market_impact, MarketImpact::None);
    }
}
