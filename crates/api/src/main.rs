use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_core::domain::options::OptionContract;
use pulse_core::domain::portfolio::{Position, WatchlistEntry};
use pulse_core::error::PipelineError;
use pulse_core::pipeline::{AnalysisReport, AnalyzeRequest, Pipeline};
use pulse_core::session::{normalize_email, InMemorySessionStore, Session, SessionStore};
use pulse_core::storage::sessions::PgSessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = pulse_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool = connect_pool(&settings).await;
    let sessions: Arc<dyn SessionStore> = match pool {
        Some(pool) => Arc::new(PgSessionStore::new(pool)),
        None => {
            tracing::warn!("sessions kept in memory; they will not survive a restart");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let pipeline = Arc::new(Pipeline::from_settings(&settings)?);
    let state = AppState { pipeline, sessions };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/analyze", post(analyze))
        .route("/options/:ticker", get(get_options))
        .route(
            "/sessions/:email",
            get(get_session).put(put_session).delete(delete_session),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn connect_pool(settings: &pulse_core::config::Settings) -> Option<PgPool> {
    let db_url = match settings.require_database_url() {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            return None;
        }
    };

    match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
    {
        Ok(pool) => match pulse_core::storage::migrate(&pool).await {
            Ok(()) => Some(pool),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
            None
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    sessions: Arc<dyn SessionStore>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Timeout,
    NotFound,
    Internal(anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Input(msg) => Self::BadRequest(msg),
            PipelineError::Timeout(_) => Self::Timeout,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout".to_string()),
            Self::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            Self::Internal(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    #[serde(flatten)]
    request: AnalyzeRequest,
    /// When set, an empty watchlist/positions is filled from the stored session.
    #[serde(default)]
    email: Option<String>,
}

async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<AnalysisReport>, ApiError> {
    let mut request = body.request;

    if let Some(email) = body.email.as_deref() {
        let email = normalize_email(email).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if let Some(session) = state.sessions.get(&email).await.map_err(ApiError::Internal)? {
            if request.watchlist.is_empty() {
                request.watchlist = session.watchlist;
            }
            if request.positions.is_empty() {
                request.positions = session.positions;
            }
        }
    }

    let report = state.pipeline.analyze(request).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct OptionsQuery {
    spot: f64,
}

async fn get_options(
    Path(ticker): Path<String>,
    Query(q): Query<OptionsQuery>,
) -> Result<Json<Vec<OptionContract>>, ApiError> {
    let chain = pulse_core::options::get_available_options(&ticker, q.spot)?;
    Ok(Json(chain))
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    watchlist: Vec<WatchlistEntry>,
    #[serde(default)]
    positions: Vec<Position>,
}

async fn get_session(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let email = normalize_email(&email).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state
        .sessions
        .get(&email)
        .await
        .map_err(ApiError::Internal)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn put_session(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(body): Json<SessionBody>,
) -> Result<Json<Session>, ApiError> {
    let email = normalize_email(&email).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let session = Session {
        email,
        display_name: body.display_name,
        watchlist: body.watchlist,
        positions: body.positions,
        updated_at: chrono::Utc::now(),
    };
    state
        .sessions
        .set(session.clone())
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(session))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<StatusCode, ApiError> {
    let email = normalize_email(&email).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if state
        .sessions
        .clear(&email)
        .await
        .map_err(ApiError::Internal)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &pulse_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pipeline_errors_map_to_status_codes() {
        let bad: ApiError = PipelineError::input("ticker set must be non-empty").into();
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let slow: ApiError = PipelineError::Timeout(Duration::from_secs(30)).into();
        assert_eq!(slow.into_response().status(), StatusCode::GATEWAY_TIMEOUT);

        assert_eq!(ApiError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn analyze_body_accepts_flat_request_with_email() {
        let body: AnalyzeBody = serde_json::from_value(json!({
            "tickers": ["AAPL", "tsla"],
            "email": "Trader@Example.com",
        }))
        .unwrap();
        assert_eq!(body.request.tickers, vec!["AAPL", "tsla"]);
        assert!(body.request.watchlist.is_empty());
        assert_eq!(body.email.as_deref(), Some("Trader@Example.com"));
    }

    #[tokio::test]
    async fn options_rejects_non_positive_spot() {
        let err = get_options(Path("AAPL".to_string()), Query(OptionsQuery { spot: 0.0 }))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn options_returns_a_chain() {
        let Json(chain) = get_options(Path("AAPL".to_string()), Query(OptionsQuery { spot: 175.0 }))
            .await
            .unwrap();
        assert_eq!(chain.len(), 36);
        assert!(chain.iter().all(|c| c.ticker == "AAPL"));
    }
}
