use crate::domain::post::{Author, Engagement, ImpactLabel, Post, TaggedTicker};
use crate::domain::sentiment::Direction;
use crate::ingest::PostSource;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
}

pub fn post(id: &str, content: &str, tags: &[(&str, Option<Direction>)]) -> Post {
    Post {
        id: id.to_string(),
        author: Author {
            username: "tester".to_string(),
            display_name: "Tester".to_string(),
            verified: false,
        },
        content: content.to_string(),
        timestamp: t0(),
        engagement: Engagement::default(),
        attached_image_urls: Vec::new(),
        impact_label: ImpactLabel::Unknown,
        tagged_tickers: tags
            .iter()
            .map(|(t, d)| TaggedTicker {
                ticker: t.to_string(),
                direction: *d,
            })
            .collect(),
    }
}

pub enum Behavior {
    Return(Vec<Post>),
    Fail(&'static str),
    /// Sleeps, then returns the posts (if anyone is still waiting).
    Slow(Duration, Vec<Post>),
}

pub struct StubSource {
    pub name: &'static str,
    pub behavior: Behavior,
    pub calls: AtomicUsize,
}

impl StubSource {
    pub fn new(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PostSource for StubSource {
    fn source_name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, _queries: &[String], _max_count: usize) -> anyhow::Result<Vec<Post>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Return(posts) => Ok(posts.clone()),
            Behavior::Fail(msg) => anyhow::bail!("{msg}"),
            Behavior::Slow(delay, posts) => {
                tokio::time::sleep(*delay).await;
                Ok(posts.clone())
            }
        }
    }
}
