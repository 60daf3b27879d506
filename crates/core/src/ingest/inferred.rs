use crate::domain::post::Post;
use crate::ingest::PostSource;
use crate::llm::{InferPostsInput, LlmClient};
use anyhow::Result;
use std::sync::Arc;

/// Fallback source: asks the LLM to surface recent posts for the queries.
pub struct InferredSource {
    llm: Arc<dyn LlmClient>,
}

impl InferredSource {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl PostSource for InferredSource {
    fn source_name(&self) -> &'static str {
        "inferred"
    }

    async fn fetch(&self, queries: &[String], max_count: usize) -> Result<Vec<Post>> {
        let input = InferPostsInput {
            queries: queries.to_vec(),
            max_count,
            now: chrono::Utc::now(),
        };
        let posts = self.llm.infer_posts(input).await?;
        tracing::debug!(
            provider = self.llm.provider().as_str(),
            posts = posts.len(),
            "inferred posts"
        );
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::LlmClassification;
    use crate::llm::Provider;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct RecordingLlm {
        seen: Mutex<Vec<InferPostsInput>>,
    }

    #[async_trait::async_trait]
    impl LlmClient for RecordingLlm {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn infer_posts(&self, input: InferPostsInput) -> Result<Vec<Post>> {
            self.seen.lock().unwrap().push(input);
            Ok(Vec::new())
        }

        async fn classify_post(
            &self,
            _post: &Post,
            _watched: &BTreeSet<String>,
        ) -> Result<LlmClassification> {
            unreachable!("not used by InferredSource")
        }
    }

    #[tokio::test]
    async fn forwards_queries_and_limit_to_llm() {
        let llm = Arc::new(RecordingLlm {
            seen: Mutex::new(Vec::new()),
        });
        let source = InferredSource::new(llm.clone());
        let posts = source
            .fetch(&["AAPL".to_string(), "@trader".to_string()], 7)
            .await
            .unwrap();
        assert!(posts.is_empty());

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].queries, vec!["AAPL".to_string(), "@trader".to_string()]);
        assert_eq!(seen[0].max_count, 7);
    }
}
