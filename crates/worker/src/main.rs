use anyhow::Context;
use clap::Parser;
use pulse_core::domain::portfolio::{Position, WatchlistEntry};
use pulse_core::pipeline::{AnalyzeRequest, Pipeline};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pulse_worker")]
struct Args {
    /// Tickers to analyze, comma separated (e.g. AAPL,TSLA).
    #[arg(long, value_delimiter = ',', required = true)]
    tickers: Vec<String>,

    /// Watchlist entries as TICKER or TICKER:PRICE.
    #[arg(long = "watch", value_parser = parse_watch)]
    watchlist: Vec<WatchlistEntry>,

    /// Held positions as TICKER:QTY:COST.
    #[arg(long = "position", value_parser = parse_position)]
    positions: Vec<Position>,

    /// Extra accounts to include, comma separated.
    #[arg(long, value_delimiter = ',')]
    accounts: Vec<String>,

    #[arg(long)]
    max_posts: Option<usize>,

    /// Print the report without writing to the database.
    #[arg(long)]
    dry_run: bool,
}

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

    let args = Args::parse();
    let tickers = args.tickers.clone();

    let pool = if args.dry_run {
        None
    } else {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        pulse_core::storage::migrate(&pool).await?;
        Some(pool)
    };

    let pipeline = Pipeline::from_settings(&settings)?;
    let request = AnalyzeRequest {
        tickers: args.tickers,
        watchlist: args.watchlist,
        positions: args.positions,
        accounts: args.accounts,
        max_posts: args.max_posts,
        ..AnalyzeRequest::default()
    };

    let started_at = chrono::Utc::now();
    match pipeline.analyze(request).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);

            let Some(pool) = &pool else {
                tracing::info!(dry_run = true, outcome = ?report.outcome, "analysis finished");
                return Ok(());
            };
            let run_id = pulse_core::storage::analyses::persist_report(pool, &report).await?;
            tracing::info!(%run_id, outcome = ?report.outcome, "persisted analysis report");
        }
        Err(err) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);

            if let Some(pool) = &pool {
                let run_id = pulse_core::storage::analyses::persist_failure(
                    pool,
                    &tickers,
                    started_at,
                    &format!("{err:#}"),
                )
                .await?;
                tracing::error!(%run_id, error = %err, "analysis run failed");
            }
            return Err(err);
        }
    }

    Ok(())
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

fn parse_watch(raw: &str) -> Result<WatchlistEntry, String> {
    let (ticker, price) = match raw.split_once(':') {
        Some((t, p)) => {
            let price: f64 = p
                .trim()
                .parse()
                .map_err(|_| format!("invalid price in {raw:?}"))?;
            (t, Some(price))
        }
        None => (raw, None),
    };
    let ticker = ticker.trim();
    if ticker.is_empty() {
        return Err(format!("missing ticker in {raw:?}"));
    }
    Ok(WatchlistEntry {
        ticker: ticker.to_string(),
        last_price: price,
    })
}

fn parse_position(raw: &str) -> Result<Position, String> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    let [ticker, qty, cost] = parts.as_slice() else {
        return Err(format!("expected TICKER:QTY:COST, got {raw:?}"));
    };
    if ticker.is_empty() {
        return Err(format!("missing ticker in {raw:?}"));
    }
    Ok(Position {
        ticker: ticker.to_string(),
        quantity: qty.parse().map_err(|_| format!("invalid quantity in {raw:?}"))?,
        average_cost: cost.parse().map_err(|_| format!("invalid cost in {raw:?}"))?,
    })
}
