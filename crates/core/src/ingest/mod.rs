pub mod coordinator;
pub mod inferred;
pub mod platform;

use crate::domain::post::Post;

/// Anything that can hand back normalized posts for a set of tickers/usernames.
///
/// Entries starting with `@` are usernames; everything else is treated as a ticker.
/// "Nothing found" is `Ok(vec![])`; `Err` is reserved for transport-level faults.
#[async_trait::async_trait]
pub trait PostSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch(&self, queries: &[String], max_count: usize) -> anyhow::Result<Vec<Post>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Username(String),
    Ticker(String),
}

impl Query {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(user) = raw.strip_prefix('@') {
            let user = user.trim();
            return (!user.is_empty()).then(|| Self::Username(user.to_string()));
        }
        crate::domain::post::normalize_ticker(raw).map(Self::Ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parse_splits_usernames_and_tickers() {
        assert_eq!(Query::parse("@unusual_whales"), Some(Query::Username("unusual_whales".into())));
        assert_eq!(Query::parse("$tsla"), Some(Query::Ticker("TSLA".into())));
        assert_eq!(Query::parse("@"), None);
        assert_eq!(Query::parse("  "), None);
    }
}
