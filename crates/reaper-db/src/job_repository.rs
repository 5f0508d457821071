use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use reaper_core::error::AppError;
use reaper_core::models::{JobDefinition, JobId};
use reaper_core::traits::JobSource;

/// PostgreSQL-backed job configuration store (`scrape_configs`).
#[derive(Clone)]
pub struct JobConfigRepository {
    pool: Pool<Postgres>,
}

impl JobConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobConfigRow {
    id: i64,
    name: String,
    url: String,
    selector: String,
    schedule: String,
    prompt: String,
    model: String,
    proxy_enabled: bool,
    wait_time: i32,
    max_retries: i32,
    timeout: i32,
    active: bool,
}

impl From<JobConfigRow> for JobDefinition {
    fn from(row: JobConfigRow) -> Self {
        JobDefinition {
            id: row.id,
            name: row.name,
            url: row.url,
            selector: row.selector,
            schedule: row.schedule,
            prompt: row.prompt,
            model: row.model,
            proxy_enabled: row.proxy_enabled,
            wait_time: u64::try_from(row.wait_time).unwrap_or(0),
            max_retries: u32::try_from(row.max_retries).unwrap_or(0),
            timeout: u64::try_from(row.timeout).unwrap_or(1).max(1),
            active: row.active,
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, name, url, selector, schedule, prompt, model, proxy_enabled, \
     wait_time, max_retries, timeout, active FROM scrape_configs";

fn to_i32(field: &str, value: u64) -> Result<i32, AppError> {
    i32::try_from(value)
        .map_err(|_| AppError::ConfigError(format!("{field} {value} is out of range")))
}

impl JobConfigRepository {
    /// Insert a job definition and return its new id. `job.id` is ignored.
    pub async fn create(&self, job: &JobDefinition) -> Result<JobId, AppError> {
        if !reaper_core::cron::validate(&job.schedule) {
            return Err(AppError::ConfigError(format!(
                "Invalid cron expression '{}'",
                job.schedule
            )));
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scrape_configs
                (name, url, selector, schedule, prompt, model, proxy_enabled,
                 wait_time, max_retries, timeout, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&job.name)
        .bind(&job.url)
        .bind(&job.selector)
        .bind(&job.schedule)
        .bind(&job.prompt)
        .bind(&job.model)
        .bind(job.proxy_enabled)
        .bind(to_i32("wait_time", job.wait_time)?)
        .bind(to_i32("max_retries", u64::from(job.max_retries))?)
        .bind(to_i32("timeout", job.timeout)?)
        .bind(job.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::info!(job_id = row.0, name = %job.name, "Created scrape config");
        Ok(row.0)
    }

    /// Flip the `active` flag. Returns false when the job does not exist.
    pub async fn set_active(&self, id: JobId, active: bool) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE scrape_configs SET active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

impl JobSource for JobConfigRepository {
    async fn list_active(&self) -> Result<Vec<JobDefinition>, AppError> {
        let rows = sqlx::query_as::<_, JobConfigRow>(&format!(
            "{SELECT_COLUMNS} WHERE active ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobDefinition>, AppError> {
        let row = sqlx::query_as::<_, JobConfigRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn last_run(&self, id: JobId) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(started_at) FROM scrape_results WHERE config_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }
}
