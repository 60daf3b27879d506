use crate::config::env_parse;
use crate::domain::post::Post;
use crate::error::PipelineError;
use crate::ingest::PostSource;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

const DEFAULT_MIN_FALLBACK_BUDGET_MS: u64 = 2_000;

/// Primary-then-fallback acquisition under one wall-clock budget.
///
/// Source failures never escape: an erroring, empty or slow primary hands over to
/// the fallback, and if both come up dry the result is simply empty.
pub struct AcquisitionCoordinator {
    primary: Arc<dyn PostSource>,
    fallback: Arc<dyn PostSource>,
    min_fallback_budget: Duration,
}

impl AcquisitionCoordinator {
    pub fn new(primary: Arc<dyn PostSource>, fallback: Arc<dyn PostSource>) -> Self {
        let min_fallback_budget = Duration::from_millis(
            env_parse::<u64>("FALLBACK_MIN_BUDGET_MS").unwrap_or(DEFAULT_MIN_FALLBACK_BUDGET_MS),
        );
        Self {
            primary,
            fallback,
            min_fallback_budget,
        }
    }

    pub fn with_min_fallback_budget(mut self, floor: Duration) -> Self {
        self.min_fallback_budget = floor;
        self
    }

    pub async fn fetch_posts(
        &self,
        queries: &[String],
        max_count: usize,
        budget: Duration,
    ) -> Result<Vec<Post>, PipelineError> {
        if queries.iter().all(|q| q.trim().is_empty()) {
            return Err(PipelineError::input("ticker/username set must be non-empty"));
        }
        if max_count == 0 {
            return Err(PipelineError::input("max_count must be > 0"));
        }

        let started = Instant::now();

        // Leave the fallback its floor inside the overall budget when possible.
        let primary_budget = match budget.checked_sub(self.min_fallback_budget) {
            Some(b) if !b.is_zero() => b,
            _ => budget,
        };

        let primary = self.primary.source_name();
        // On elapse the in-flight future is dropped, so nothing from it can leak later.
        match timeout(primary_budget, self.primary.fetch(queries, max_count)).await {
            Ok(Ok(posts)) if !posts.is_empty() => {
                tracing::debug!(source = primary, posts = posts.len(), "primary source answered");
                return Ok(finalize(posts, max_count));
            }
            Ok(Ok(_)) => {
                tracing::info!(source = primary, "primary source returned no posts; falling back");
            }
            Ok(Err(err)) => {
                tracing::warn!(source = primary, error = %err, "source degraded; falling back");
            }
            Err(_) => {
                tracing::warn!(
                    source = primary,
                    budget_ms = primary_budget.as_millis() as u64,
                    "source timed out; falling back"
                );
            }
        }

        let remaining = budget
            .saturating_sub(started.elapsed())
            .max(self.min_fallback_budget);
        let fallback = self.fallback.source_name();
        match timeout(remaining, self.fallback.fetch(queries, max_count)).await {
            Ok(Ok(posts)) => {
                tracing::debug!(source = fallback, posts = posts.len(), "fallback source answered");
                Ok(finalize(posts, max_count))
            }
            Ok(Err(err)) => {
                tracing::warn!(source = fallback, error = %err, "source degraded; no posts acquired");
                Ok(Vec::new())
            }
            Err(_) => {
                tracing::warn!(
                    source = fallback,
                    budget_ms = remaining.as_millis() as u64,
                    "source timed out; no posts acquired"
                );
                Ok(Vec::new())
            }
        }
    }
}

/// Drops repeated ids (first wins) and caps the batch at `max_count`.
fn finalize(posts: Vec<Post>, max_count: usize) -> Vec<Post> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .take(max_count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{post, Behavior, StubSource};

    fn five_posts(prefix: &str) -> Vec<Post> {
        (0..5)
            .map(|i| post(&format!("{prefix}-{i}"), "$XYZ chatter", &[]))
            .collect()
    }

    fn coordinator(primary: Arc<StubSource>, fallback: Arc<StubSource>) -> AcquisitionCoordinator {
        AcquisitionCoordinator::new(primary, fallback)
            .with_min_fallback_budget(Duration::from_secs(2))
    }

    fn q(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[tokio::test]
    async fn primary_posts_are_returned_without_touching_fallback() {
        let primary = Arc::new(StubSource::new("platform", Behavior::Return(five_posts("p"))));
        let fallback = Arc::new(StubSource::new("inferred", Behavior::Return(five_posts("f"))));
        let c = coordinator(primary.clone(), fallback.clone());

        let posts = c.fetch_posts(&q("AAPL"), 50, Duration::from_secs(10)).await.unwrap();
        assert_eq!(posts, five_posts("p"));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn empty_primary_yields_exactly_fallback_output() {
        let primary = Arc::new(StubSource::new("platform", Behavior::Return(Vec::new())));
        let fallback = Arc::new(StubSource::new("inferred", Behavior::Return(five_posts("f"))));
        let c = coordinator(primary, fallback.clone());

        let posts = c.fetch_posts(&q("AAPL"), 50, Duration::from_secs(10)).await.unwrap();
        let direct = fallback.fetch(&q("AAPL"), 50).await.unwrap();
        assert_eq!(posts, direct);
    }

    #[tokio::test]
    async fn failing_primary_falls_back() {
        let primary = Arc::new(StubSource::new("platform", Behavior::Fail("429 rate limited")));
        let fallback = Arc::new(StubSource::new("inferred", Behavior::Return(five_posts("f"))));
        let c = coordinator(primary, fallback);

        let posts = c.fetch_posts(&q("AAPL"), 50, Duration::from_secs(10)).await.unwrap();
        assert_eq!(posts.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_primary_is_abandoned_and_fallback_posts_returned() {
        let primary = Arc::new(StubSource::new(
            "platform",
            Behavior::Slow(Duration::from_secs(60), five_posts("late")),
        ));
        let fallback = Arc::new(StubSource::new(
            "inferred",
            Behavior::Slow(Duration::from_secs(1), five_posts("f")),
        ));
        let c = coordinator(primary, fallback);

        let started = Instant::now();
        let posts = c.fetch_posts(&q("AAPL"), 50, Duration::from_secs(10)).await.unwrap();
        assert_eq!(posts, five_posts("f"));
        assert!(posts.iter().all(|p| !p.id.starts_with("late")));
        // 8s primary window + 1s fallback.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(9) && elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_gets_floor_when_budget_is_tiny() {
        let primary = Arc::new(StubSource::new(
            "platform",
            Behavior::Slow(Duration::from_secs(60), five_posts("late")),
        ));
        let fallback = Arc::new(StubSource::new(
            "inferred",
            Behavior::Slow(Duration::from_millis(1_500), five_posts("f")),
        ));
        let c = coordinator(primary, fallback);

        let posts = c.fetch_posts(&q("AAPL"), 50, Duration::from_secs(1)).await.unwrap();
        assert_eq!(posts.len(), 5);
    }

    #[tokio::test]
    async fn both_sources_empty_is_not_an_error() {
        let primary = Arc::new(StubSource::new("platform", Behavior::Return(Vec::new())));
        let fallback = Arc::new(StubSource::new("inferred", Behavior::Fail("llm down")));
        let c = coordinator(primary, fallback);

        let posts = c.fetch_posts(&q("XYZ"), 50, Duration::from_secs(10)).await.unwrap();
        assert!(posts.is_empty());
    }

    #[tokio::test]
    async fn rejects_programmer_error_inputs() {
        let primary = Arc::new(StubSource::new("platform", Behavior::Return(Vec::new())));
        let fallback = Arc::new(StubSource::new("inferred", Behavior::Return(Vec::new())));
        let c = coordinator(primary.clone(), fallback);

        let err = c.fetch_posts(&[], 50, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        let err = c.fetch_posts(&q("AAPL"), 0, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn duplicates_are_dropped_and_batch_capped() {
        let mut posts = five_posts("p");
        posts.push(post("p-0", "dupe", &[]));
        let primary = Arc::new(StubSource::new("platform", Behavior::Return(posts)));
        let fallback = Arc::new(StubSource::new("inferred", Behavior::Return(Vec::new())));
        let c = coordinator(primary, fallback);

        let out = c.fetch_posts(&q("AAPL"), 3, Duration::from_secs(10)).await.unwrap();
        let ids: Vec<_> = out.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p-0", "p-1", "p-2"]);

        let out = c.fetch_posts(&q("AAPL"), 50, Duration::from_secs(10)).await.unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].content, "$XYZ chatter");
    }
}
