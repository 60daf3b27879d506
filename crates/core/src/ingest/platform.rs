use crate::config::{env_parse, Settings};
use crate::domain::post::{normalize_ticker, Author, Engagement, ImpactLabel, Post, TaggedTicker};
use crate::ingest::{PostSource, Query};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PATH: &str = "/2/tweets/search/recent";
const DEFAULT_RETRIES: u32 = 2;
const MAX_RETRIES: u32 = 10;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// Recent-search rejects max_results outside this range.
const MIN_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

/// Direct social-platform search (X API v2 recent-search shape).
#[derive(Debug, Clone)]
pub struct PlatformSource {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
    path: String,
    retries: u32,
    default_accounts: Vec<String>,
}

impl PlatformSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_platform_base_url()?.to_string();
        let bearer_token = settings.require_platform_bearer_token()?.to_string();

        let timeout_secs = env_parse::<u64>("PLATFORM_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries = env_parse::<u32>("PLATFORM_RETRIES").unwrap_or(DEFAULT_RETRIES);

        let path = std::env::var("PLATFORM_SEARCH_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let default_accounts = std::env::var("PULSE_DEFAULT_ACCOUNTS")
            .ok()
            .map(|s| parse_accounts(&s))
            .unwrap_or_default();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build platform http client")?;

        Ok(Self {
            http,
            base_url,
            bearer_token,
            path,
            retries: retries.clamp(1, MAX_RETRIES),
            default_accounts,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.bearer_token))?,
        );
        Ok(headers)
    }

    async fn fetch_once(&self, query: &str, max_count: usize) -> Result<Vec<Post>> {
        let page_size = max_count.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[
                ("query", query.to_string()),
                ("max_results", page_size.to_string()),
                ("tweet.fields", "created_at,public_metrics,entities,attachments".to_string()),
                ("expansions", "author_id,attachments.media_keys".to_string()),
                ("user.fields", "username,name,verified".to_string()),
                ("media.fields", "url,preview_image_url".to_string()),
            ])
            .send()
            .await
            .context("platform search request failed")?;

        let status = res.status();
        // Unknown accounts and empty searches are "nothing found", not failures.
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let text = res
            .text()
            .await
            .context("failed to read platform response")?;
        if !status.is_success() {
            anyhow::bail!("platform HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<SearchResponse>(&text)
            .with_context(|| format!("platform response has unexpected shape: {text}"))?;
        let mut posts = parsed.into_posts();
        posts.truncate(max_count);
        Ok(posts)
    }
}

#[async_trait::async_trait]
impl PostSource for PlatformSource {
    fn source_name(&self) -> &'static str {
        "platform"
    }

    async fn fetch(&self, queries: &[String], max_count: usize) -> Result<Vec<Post>> {
        let Some(query) = build_search_query(queries, &self.default_accounts) else {
            return Ok(Vec::new());
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(&query, max_count).await {
                Ok(posts) => return Ok(posts),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, error = %err, "platform fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// 500ms doubling per attempt, capped at [`MAX_BACKOFF`].
fn retry_backoff(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(500u64.saturating_mul(factor)).min(MAX_BACKOFF)
}

fn parse_accounts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('@'))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// `(from:a OR from:b OR $AAPL) -is:retweet`. `None` when nothing usable remains.
fn build_search_query(queries: &[String], default_accounts: &[String]) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for q in queries {
        let Some(parsed) = Query::parse(q) else {
            continue;
        };
        let term = match parsed {
            Query::Username(u) => format!("from:{u}"),
            Query::Ticker(t) => format!("${t}"),
        };
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    for account in default_accounts {
        let term = format!("from:{account}");
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    Some(format!("({}) -is:retweet", terms.join(" OR ")))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<RawTweet>,
    #[serde(default)]
    includes: Includes,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<RawUser>,
    #[serde(default)]
    media: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawTweet {
    id: String,
    text: String,
    author_id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    public_metrics: PublicMetrics,
    #[serde(default)]
    entities: Option<Entities>,
    #[serde(default)]
    attachments: Option<Attachments>,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
}

#[derive(Debug, Deserialize)]
struct Entities {
    #[serde(default)]
    cashtags: Vec<Cashtag>,
}

#[derive(Debug, Deserialize)]
struct Cashtag {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    username: String,
    name: String,
    #[serde(default)]
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    media_key: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    preview_image_url: Option<String>,
}

impl SearchResponse {
    fn into_posts(self) -> Vec<Post> {
        let users: HashMap<&str, &RawUser> = self
            .includes
            .users
            .iter()
            .map(|u| (u.id.as_str(), u))
            .collect();
        let media: HashMap<&str, &str> = self
            .includes
            .media
            .iter()
            .filter_map(|m| {
                m.url
                    .as_deref()
                    .or(m.preview_image_url.as_deref())
                    .map(|url| (m.media_key.as_str(), url))
            })
            .collect();

        self.data
            .into_iter()
            .map(|t| {
                let author = match users.get(t.author_id.as_str()) {
                    Some(u) => Author {
                        username: u.username.clone(),
                        display_name: u.name.clone(),
                        verified: u.verified,
                    },
                    None => Author {
                        username: t.author_id.clone(),
                        display_name: t.author_id.clone(),
                        verified: false,
                    },
                };
                let engagement = Engagement {
                    likes: t.public_metrics.like_count,
                    retweets: t.public_metrics.retweet_count,
                };
                let attached_image_urls = t
                    .attachments
                    .map(|a| {
                        a.media_keys
                            .iter()
                            .filter_map(|k| media.get(k.as_str()).map(|u| u.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                let mut tagged_tickers: Vec<TaggedTicker> = Vec::new();
                for tag in t.entities.map(|e| e.cashtags).unwrap_or_default() {
                    if let Some(ticker) = normalize_ticker(&tag.tag) {
                        if !tagged_tickers.iter().any(|x| x.ticker == ticker) {
                            tagged_tickers.push(TaggedTicker {
                                ticker,
                                direction: None,
                            });
                        }
                    }
                }

                Post {
                    id: t.id,
                    author,
                    content: t.text,
                    timestamp: t.created_at,
                    engagement,
                    attached_image_urls,
                    impact_label: ImpactLabel::from_engagement(engagement),
                    tagged_tickers,
                }
            })
            .collect()
    }
}
