//! Persistent storage for prediction jobs.
//!
//! The monitor only sees the [`JobStore`] trait; [`SqliteJobStore`] is the
//! bundled implementation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use prediction_feedback::monitor::NewPredictionJob;
//! use prediction_feedback::storage::{JobStore, SqliteJobStore};
//!
//! let store = SqliteJobStore::open("sqlite://prediction_jobs.db").await?;
//! let job = store.create(NewPredictionJob::new(service_url, "subject-set-1")).await?;
//! let reloaded = store.load(job.id).await?;
//! ```

pub mod job_store;
pub mod schema;

use async_trait::async_trait;
use thiserror::Error;

use crate::monitor::PredictionJob;

pub use job_store::SqliteJobStore;

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// No job with this id.
    #[error("Prediction job {0} not found")]
    NotFound(i64),

    /// A stored row could not be decoded.
    #[error("Prediction job {id} is corrupt: {message}")]
    Corrupt { id: i64, message: String },
}

/// Loads and saves prediction jobs between poll cycles.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, id: i64) -> Result<PredictionJob, StoreError>;
    async fn save(&self, job: &PredictionJob) -> Result<(), StoreError>;
}
