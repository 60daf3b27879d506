pub mod aggregate;
pub mod cache;
pub mod classify;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod options;
pub mod pipeline;
pub mod rank;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testutil;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub platform_base_url: Option<String>,
        pub platform_bearer_token: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                platform_base_url: std::env::var("PLATFORM_BASE_URL").ok(),
                platform_bearer_token: std::env::var("PLATFORM_BEARER_TOKEN").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_platform_base_url(&self) -> anyhow::Result<&str> {
            self.platform_base_url
                .as_deref()
                .context("PLATFORM_BASE_URL is required")
        }

        pub fn require_platform_bearer_token(&self) -> anyhow::Result<&str> {
            self.platform_bearer_token
                .as_deref()
                .context("PLATFORM_BEARER_TOKEN is required")
        }
    }

    pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
    }
}
