use crate::domain::portfolio::{Position, WatchlistEntry};
use crate::session::{normalize_email, Session, SessionStore};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

/// Postgres-backed [`SessionStore`].
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: sqlx::PgPool,
}

impl PgSessionStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

type SessionRow = (
    String,
    Option<String>,
    Json<Vec<WatchlistEntry>>,
    Json<Vec<Position>>,
    DateTime<Utc>,
);

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn get(&self, email: &str) -> anyhow::Result<Option<Session>> {
        let email = normalize_email(email)?;
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT email, display_name, watchlist, positions, updated_at \
             FROM user_sessions WHERE email = $1",
        )
        .persistent(false)
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select user_sessions failed (email={email})"))?;

        Ok(row.map(
            |(email, display_name, Json(watchlist), Json(positions), updated_at)| Session {
                email,
                display_name,
                watchlist,
                positions,
                updated_at,
            },
        ))
    }

    async fn set(&self, session: Session) -> anyhow::Result<()> {
        let email = normalize_email(&session.email)?;
        sqlx::query(
            "INSERT INTO user_sessions (email, display_name, watchlist, positions, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (email) DO UPDATE \
               SET display_name = EXCLUDED.display_name, watchlist = EXCLUDED.watchlist, \
                   positions = EXCLUDED.positions, updated_at = EXCLUDED.updated_at",
        )
        .persistent(false)
        .bind(&email)
        .bind(&session.display_name)
        .bind(Json(&session.watchlist))
        .bind(Json(&session.positions))
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .context("upsert user_sessions failed")?;
        Ok(())
    }

    async fn clear(&self, email: &str) -> anyhow::Result<bool> {
        let email = normalize_email(email)?;
        let res = sqlx::query("DELETE FROM user_sessions WHERE email = $1")
            .persistent(false)
            .bind(&email)
            .execute(&self.pool)
            .await
            .context("delete user_sessions failed")?;
        Ok(res.rows_affected() > 0)
    }
}
