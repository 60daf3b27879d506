use crate::domain::suggestion::{Action, Suggestion};
use crate::pipeline::{AnalysisOutcome, AnalysisReport};
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Stores a caller-owned snapshot of a finished analysis. The pipeline itself
/// never calls this.
pub async fn persist_report(pool: &sqlx::PgPool, report: &AnalysisReport) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let status = match report.outcome {
        AnalysisOutcome::Signal => "signal",
        AnalysisOutcome::NoSignal => "no_signal",
    };
    let report_json = serde_json::to_value(report).context("serialize analysis report failed")?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query(
        "INSERT INTO analysis_runs (id, generated_at, tickers, status, error, posts_analyzed, report) \
         VALUES ($1, $2, $3, $4, NULL, $5, $6)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(report.generated_at)
    .bind(&report.tickers)
    .bind(status)
    .bind(i32::try_from(report.posts_analyzed).unwrap_or(i32::MAX))
    .bind(report_json)
    .execute(&mut *tx)
    .await
    .context("insert analysis_runs failed")?;

    for (kind, items) in [
        ("stock", &report.stock_suggestions),
        ("option", &report.option_suggestions),
    ] {
        for (idx, item) in items.iter().enumerate() {
            insert_suggestion(&mut tx, run_id, kind, idx as i32 + 1, item).await?;
        }
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(run_id)
}

pub async fn persist_failure(
    pool: &sqlx::PgPool,
    tickers: &[String],
    generated_at: DateTime<Utc>,
    error: &str,
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO analysis_runs (id, generated_at, tickers, status, error, posts_analyzed, report) \
         VALUES ($1, $2, $3, 'error', $4, 0, NULL)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(generated_at)
    .bind(tickers)
    .bind(error)
    .execute(pool)
    .await
    .context("insert error analysis_runs failed")?;

    Ok(run_id)
}

async fn insert_suggestion(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: Uuid,
    kind: &str,
    rank: i32,
    item: &Suggestion,
) -> anyhow::Result<()> {
    let supporting: Vec<String> = item.supporting_post_ids.iter().cloned().collect();
    let option_leg = item
        .option
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .context("serialize option leg failed")?;

    sqlx::query(
        "INSERT INTO analysis_suggestions \
         (run_id, suggestion_id, kind, rank, ticker, action, confidence, reason, supporting_post_ids, option_leg) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(item.id)
    .bind(kind)
    .bind(rank)
    .bind(&item.ticker)
    .bind(action_str(item.action))
    .bind(i16::from(item.confidence))
    .bind(&item.reason)
    .bind(supporting)
    .bind(option_leg)
    .execute(&mut **tx)
    .await
    .context("insert analysis_suggestions failed")?;

    Ok(())
}

fn action_str(action: Action) -> &'static str {
    match action {
        Action::Buy => "buy",
        Action::Sell => "sell",
        Action::Hold => "hold",
    }
}
