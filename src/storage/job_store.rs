//! SQLite-backed prediction job store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::monitor::{NewPredictionJob, PredictionJob, PredictionJobStatus};

use super::schema;
use super::{JobStore, StoreError};

const SELECT_COLUMNS: &str = "id, service_job_url, subject_set_id, results_url, status, message, created_at, updated_at";

/// Prediction job store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Opens (creating if missing) the database at `url` and applies the schema.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection string (e.g., "sqlite://prediction_jobs.db")
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool };
        store.apply_schema().await?;

        info!(url = url, "Prediction job store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// Each SQLite memory connection is its own database, so the pool holds a
    /// single connection that never expires.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<(), StoreError> {
        for statement in schema::all_schema_statements() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Registers a new job in the `pending` state.
    pub async fn create(&self, new_job: NewPredictionJob) -> Result<PredictionJob, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO prediction_jobs (
                service_job_url, subject_set_id, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&new_job.service_job_url)
        .bind(&new_job.subject_set_id)
        .bind(PredictionJobStatus::Pending.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(PredictionJob {
            id: result.last_insert_rowid(),
            service_job_url: new_job.service_job_url,
            subject_set_id: new_job.subject_set_id,
            results_url: None,
            status: PredictionJobStatus::Pending,
            message: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Lists jobs in `status`, oldest first.
    pub async fn list_by_status(
        &self,
        status: PredictionJobStatus,
    ) -> Result<Vec<PredictionJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM prediction_jobs WHERE status = ?1 ORDER BY id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn load(&self, id: i64) -> Result<PredictionJob, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM prediction_jobs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn save(&self, job: &PredictionJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE prediction_jobs
            SET service_job_url = ?1,
                subject_set_id = ?2,
                results_url = ?3,
                status = ?4,
                message = ?5,
                updated_at = ?6
            WHERE id = ?7
            "#,
        )
        .bind(&job.service_job_url)
        .bind(&job.subject_set_id)
        .bind(&job.results_url)
        .bind(job.status.as_str())
        .bind(&job.message)
        .bind(job.updated_at.to_rfc3339())
        .bind(job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id));
        }
        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<PredictionJob, StoreError> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(PredictionJob {
        id,
        service_job_url: row.try_get("service_job_url")?,
        subject_set_id: row.try_get("subject_set_id")?,
        results_url: row.try_get("results_url")?,
        status: status
            .parse()
            .map_err(|message| StoreError::Corrupt { id, message })?,
        message: row.try_get("message")?,
        created_at: parse_timestamp(id, &created_at)?,
        updated_at: parse_timestamp(id, &updated_at)?,
    })
}

fn parse_timestamp(id: i64, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id,
            message: format!("invalid timestamp '{}': {}", raw, e),
        })
}
