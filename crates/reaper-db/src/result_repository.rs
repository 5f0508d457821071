use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sqlx::{PgPool, Pool, Postgres};

use reaper_core::error::AppError;
use reaper_core::models::{JobId, JobOutcome};
use reaper_core::traits::OutcomeSink;

/// Aggregate of recorded runs since a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub since: DateTime<Utc>,
    pub total_runs: i64,
    pub successful_runs: i64,
    /// Percentage, 0 when there were no runs.
    pub success_rate: f64,
    pub total_cost: f64,
    pub avg_duration_secs: f64,
}

/// A stored run, as listed by [`ScrapeResultRepository::recent`].
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredResult {
    pub id: i64,
    pub config_id: JobId,
    pub status: String,
    pub error_message: Option<String>,
    pub scrape_attempts: i32,
    pub enrichment_error: Option<String>,
    pub enrichment_cost: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
}

/// PostgreSQL-backed outcome sink (`scrape_results`).
#[derive(Clone)]
pub struct ScrapeResultRepository {
    pool: Pool<Postgres>,
}

impl ScrapeResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one outcome. Returns the new row id.
    pub async fn save(&self, outcome: &JobOutcome) -> Result<i64, AppError> {
        let extraction = &outcome.extraction;
        let extracted_data = if extraction.status.is_success() {
            Some(serde_json::to_value(&extraction.elements)?)
        } else {
            None
        };
        let enrichment = outcome.enrichment.as_ref();
        let attempts = i32::try_from(extraction.attempts.len().max(1)).unwrap_or(i32::MAX);

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scrape_results
                (config_id, status, raw_html, extracted_data, error_message, scrape_attempts,
                 enrichment_data, enrichment_error, enrichment_cost, enrichment_model,
                 started_at, completed_at, duration_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(outcome.job_id)
        .bind(outcome.status.as_str())
        .bind(extraction.raw_html.as_deref())
        .bind(extracted_data)
        .bind(outcome.error())
        .bind(attempts)
        .bind(enrichment.and_then(|e| e.data.clone()))
        .bind(enrichment.and_then(|e| e.error.as_deref()))
        .bind(enrichment.map(|e| e.cost))
        .bind(enrichment.map(|e| e.model_used.as_str()))
        .bind(outcome.started_at)
        .bind(outcome.completed_at)
        .bind(outcome.duration.as_secs_f64())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    /// Totals over runs started at or after `since`.
    pub async fn summary(&self, since: DateTime<Utc>) -> Result<RunSummary, AppError> {
        let (total_runs, successful_runs, total_cost, avg_duration_secs): (i64, i64, f64, f64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*)::BIGINT,
                    COUNT(*) FILTER (WHERE status = 'success')::BIGINT,
                    COALESCE(SUM(enrichment_cost), 0)::DOUBLE PRECISION,
                    COALESCE(AVG(duration_seconds), 0)::DOUBLE PRECISION
                FROM scrape_results
                WHERE started_at >= $1
                "#,
            )
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let success_rate = if total_runs > 0 {
            successful_runs as f64 / total_runs as f64 * 100.0
        } else {
            0.0
        };

        Ok(RunSummary {
            since,
            total_runs,
            successful_runs,
            success_rate,
            total_cost,
            avg_duration_secs,
        })
    }

    /// Latest runs of one job, newest first.
    pub async fn recent(&self, config_id: JobId, limit: usize) -> Result<Vec<StoredResult>, AppError> {
        sqlx::query_as::<_, StoredResult>(
            r#"
            SELECT id, config_id, status, error_message, scrape_attempts, enrichment_error,
                   enrichment_cost, started_at, duration_seconds
            FROM scrape_results
            WHERE config_id = $1
            ORDER BY started_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(config_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))
    }

    /// Delete runs started more than `days` ago. Returns the number removed.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64, AppError> {
        let cutoff = Utc::now() - TimeDelta::days(i64::from(days));
        let result = sqlx::query("DELETE FROM scrape_results WHERE started_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let deleted = result.rows_affected();
        tracing::info!(deleted, days_to_keep = days, "Cleaned up old results");
        Ok(deleted)
    }
}

// -- Trait implementation --

impl OutcomeSink for ScrapeResultRepository {
    async fn record(&self, outcome: &JobOutcome) -> Result<(), AppError> {
        let id = self.save(outcome).await?;
        tracing::debug!(result_id = id, job_id = outcome.job_id, "Stored job outcome");
        Ok(())
    }
}
