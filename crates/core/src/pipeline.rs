use crate::aggregate::{aggregate, SentimentSummary};
use crate::cache::{CacheKey, SingleFlightCache};
use crate::classify::llm::LlmClassifier;
use crate::classify::rules::RuleClassifier;
use crate::classify::ImpactClassifier;
use crate::config::{env_parse, Settings};
use crate::domain::options::OptionContract;
use crate::domain::portfolio::{Position, WatchlistEntry};
use crate::domain::post::{normalize_ticker, Post};
use crate::domain::sentiment::MarketImpact;
use crate::domain::suggestion::Suggestion;
use crate::error::PipelineError;
use crate::ingest::coordinator::AcquisitionCoordinator;
use crate::ingest::inferred::InferredSource;
use crate::ingest::platform::PlatformSource;
use crate::llm::anthropic::AnthropicClient;
use crate::llm::LlmClient;
use crate::rank::{MentionEvidence, RankInput, RankerOptions, SuggestionRanker};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Whole-request budget: acquisition, classification and ranking.
    pub budget: Duration,
    /// Portion of the budget handed to the acquisition coordinator.
    pub acquisition_budget: Duration,
    pub max_posts: usize,
    pub classify_concurrency: usize,
    /// Acquisition cache window; 0 disables the cache.
    pub cache_bucket_secs: i64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(30),
            acquisition_budget: Duration::from_secs(20),
            max_posts: 50,
            classify_concurrency: 8,
            cache_bucket_secs: 0,
        }
    }
}

impl PipelineOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Some(n) = env_parse::<u64>("PIPELINE_BUDGET_SECS").filter(|n| *n > 0) {
            out.budget = Duration::from_secs(n);
        }
        if let Some(n) = env_parse::<u64>("ACQUISITION_BUDGET_SECS").filter(|n| *n > 0) {
            out.acquisition_budget = Duration::from_secs(n);
        }
        if let Some(n) = env_parse::<usize>("PIPELINE_MAX_POSTS").filter(|n| *n > 0) {
            out.max_posts = n;
        }
        if let Some(n) = env_parse::<usize>("CLASSIFY_CONCURRENCY").filter(|n| *n > 0) {
            out.classify_concurrency = n;
        }
        if let Some(n) = env_parse::<i64>("PIPELINE_CACHE_BUCKET_SECS") {
            out.cache_bucket_secs = n.max(0);
        }

        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub tickers: Vec<String>,
    #[serde(default)]
    pub watchlist: Vec<WatchlistEntry>,
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Extra accounts to pull posts from (without the leading `@`).
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub max_posts: Option<usize>,
    #[serde(default)]
    pub live_chains: BTreeMap<String, Vec<OptionContract>>,
}

/// Lets callers tell "ran fine, nothing to say" from a real signal without
/// inspecting counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Signal,
    NoSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub tickers: Vec<String>,
    pub outcome: AnalysisOutcome,
    pub posts_analyzed: usize,
    pub posts_excluded: usize,
    pub sentiment: SentimentSummary,
    pub stock_suggestions: Vec<Suggestion>,
    pub option_suggestions: Vec<Suggestion>,
}

pub struct Pipeline {
    coordinator: AcquisitionCoordinator,
    classifier: Arc<dyn ImpactClassifier>,
    ranker: SuggestionRanker,
    opts: PipelineOptions,
    cache: Option<SingleFlightCache<Vec<Post>>>,
}

impl Pipeline {
    pub fn new(
        coordinator: AcquisitionCoordinator,
        classifier: Arc<dyn ImpactClassifier>,
        ranker: SuggestionRanker,
        opts: PipelineOptions,
    ) -> Self {
        let cache = (opts.cache_bucket_secs > 0).then(SingleFlightCache::new);
        Self {
            coordinator,
            classifier,
            ranker,
            opts,
            cache,
        }
    }

    /// Platform first, LLM inference as fallback; classifier chosen by `CLASSIFIER`
    /// (`rules` by default, or `llm`).
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let llm: Arc<dyn LlmClient> = Arc::new(AnthropicClient::from_settings(settings)?);
        let platform = Arc::new(PlatformSource::from_settings(settings)?);
        let inferred = Arc::new(InferredSource::new(llm.clone()));
        let coordinator = AcquisitionCoordinator::new(platform, inferred);

        let classifier: Arc<dyn ImpactClassifier> = match std::env::var("CLASSIFIER")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "llm" => Arc::new(LlmClassifier::new(llm)),
            _ => Arc::new(RuleClassifier::new()),
        };

        Ok(Self::new(
            coordinator,
            classifier,
            SuggestionRanker::new(RankerOptions::from_env()),
            PipelineOptions::from_env(),
        ))
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.opts
    }

    pub async fn analyze(&self, req: AnalyzeRequest) -> Result<AnalysisReport, PipelineError> {
        self.analyze_at(req, Utc::now()).await
    }

    /// Runs the whole request under `budget`. When the budget elapses everything
    /// in flight is dropped and [`PipelineError::Timeout`] comes back, never a
    /// partial report.
    pub async fn analyze_at(
        &self,
        req: AnalyzeRequest,
        now: DateTime<Utc>,
    ) -> Result<AnalysisReport, PipelineError> {
        let scope = validate_tickers(&req.tickers)?;
        let max_posts = match req.max_posts {
            Some(0) => return Err(PipelineError::input("max_posts must be > 0")),
            Some(n) => n,
            None => self.opts.max_posts,
        };

        let budget = self.opts.budget;
        match tokio::time::timeout(budget, self.run(req, scope, max_posts, now)).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(budget_ms = budget.as_millis() as u64, "analysis timed out");
                Err(PipelineError::Timeout(budget))
            }
        }
    }

    async fn run(
        &self,
        req: AnalyzeRequest,
        scope: BTreeSet<String>,
        max_posts: usize,
        now: DateTime<Utc>,
    ) -> Result<AnalysisReport, PipelineError> {
        let mut queries: Vec<String> = scope.iter().cloned().collect();
        queries.extend(
            req.accounts
                .iter()
                .map(|a| a.trim().trim_start_matches('@'))
                .filter(|a| !a.is_empty())
                .map(|a| format!("@{a}")),
        );

        let posts = self.acquire(&queries, &scope, max_posts, now).await?;

        // Order-preserving fan-out; `collect` is the join barrier before aggregation.
        let classifier = self.classifier.as_ref();
        let watched = &scope;
        let classified: Vec<_> = stream::iter(posts.iter())
            .map(|post| async move { (post, classifier.classify(post, watched).await) })
            .buffered(self.opts.classify_concurrency.max(1))
            .boxed()
            .collect()
            .await;

        let mut evidence = Vec::new();
        let mut excluded = 0usize;
        for (post, classification) in classified {
            if classification.market_impact == MarketImpact::None {
                excluded += 1;
                continue;
            }
            evidence.extend(classification.mentions.into_iter().map(|mention| MentionEvidence {
                mention,
                timestamp: post.timestamp,
            }));
        }

        let mentions: Vec<_> = evidence.iter().map(|e| e.mention.clone()).collect();
        let sentiment = aggregate(&mentions, &scope, now);
        let ranked = self.ranker.rank(RankInput {
            summary: &sentiment,
            evidence: &evidence,
            watchlist: &req.watchlist,
            positions: &req.positions,
            live_chains: &req.live_chains,
            now,
        });

        let outcome = if mentions.is_empty() {
            AnalysisOutcome::NoSignal
        } else {
            AnalysisOutcome::Signal
        };

        tracing::info!(
            classifier = self.classifier.classifier_name(),
            tickers = scope.len(),
            posts = posts.len(),
            excluded,
            mentions = mentions.len(),
            stock_suggestions = ranked.stock_suggestions.len(),
            option_suggestions = ranked.option_suggestions.len(),
            ?outcome,
            "analysis finished"
        );

        Ok(AnalysisReport {
            generated_at: now,
            tickers: scope.into_iter().collect(),
            outcome,
            posts_analyzed: posts.len(),
            posts_excluded: excluded,
            sentiment,
            stock_suggestions: ranked.stock_suggestions,
            option_suggestions: ranked.option_suggestions,
        })
    }

    async fn acquire(
        &self,
        queries: &[String],
        scope: &BTreeSet<String>,
        max_posts: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Post>, PipelineError> {
        let budget = self.opts.acquisition_budget.min(self.opts.budget);
        let fetch = || self.coordinator.fetch_posts(queries, max_posts, budget);
        match &self.cache {
            Some(cache) => {
                let mut key_set = scope.clone();
                key_set.extend(queries.iter().filter(|q| q.starts_with('@')).cloned());
                let key = CacheKey::new(&key_set, max_posts, now, self.opts.cache_bucket_secs);
                cache.get_or_try_init(key, fetch).await
            }
            None => fetch().await,
        }
    }
}

fn validate_tickers(raw: &[String]) -> Result<BTreeSet<String>, PipelineError> {
    let mut out = BTreeSet::new();
    for t in raw {
        let ticker = normalize_ticker(t)
            .ok_or_else(|| PipelineError::input(format!("invalid ticker: {t:?}")))?;
        out.insert(ticker);
    }
    if out.is_empty() {
        return Err(PipelineError::input("ticker set must be non-empty"));
    }
    Ok(out)
}
