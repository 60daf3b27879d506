use crate::domain::portfolio::{Position, WatchlistEntry};
use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Per-user state the UI keeps between visits. Keyed by normalized email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub watchlist: Vec<WatchlistEntry>,
    #[serde(default)]
    pub positions: Vec<Position>,
    pub updated_at: DateTime<Utc>,
}

pub fn normalize_email(raw: &str) -> anyhow::Result<String> {
    let email = raw.trim().to_ascii_lowercase();
    ensure!(
        email.len() >= 3 && email.contains('@') && !email.starts_with('@') && !email.ends_with('@'),
        "invalid email: {raw:?}"
    );
    Ok(email)
}

/// Injected session capability; nothing in the crate reaches for a global store.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, email: &str) -> anyhow::Result<Option<Session>>;

    async fn set(&self, session: Session) -> anyhow::Result<()>;

    /// Returns whether a session existed.
    async fn clear(&self, email: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, email: &str) -> anyhow::Result<Option<Session>> {
        let email = normalize_email(email)?;
        Ok(self.inner.read().await.get(&email).cloned())
    }

    async fn set(&self, mut session: Session) -> anyhow::Result<()> {
        session.email = normalize_email(&session.email)?;
        self.inner
            .write()
            .await
            .insert(session.email.clone(), session);
        Ok(())
    }

    async fn clear(&self, email: &str) -> anyhow::Result<bool> {
        let email = normalize_email(email)?;
        Ok(self.inner.write().await.remove(&email).is_some())
    }
}
