//! Advancing a prediction job against the external batch system.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::types::{PredictionJob, PredictionJobStatus};

/// Errors raised while querying the batch system.
#[derive(Debug, Error)]
pub enum AdvanceError {
    #[error("Batch status request for '{url}' failed: {message}")]
    Request { url: String, message: String },

    #[error("Batch system returned HTTP {status} for '{url}'")]
    Status { url: String, status: u16 },

    #[error("Failed to decode batch status response: {0}")]
    Decode(String),

    #[error("Unknown batch job status '{0}'")]
    UnknownStatus(String),
}

/// Queries the batch system for a job and returns the job with its new status.
#[async_trait]
pub trait BatchAdvancer: Send + Sync {
    async fn advance(&self, job: &PredictionJob) -> Result<PredictionJob, AdvanceError>;
}

/// Status document served at a job's `service_job_url`.
#[derive(Debug, Deserialize)]
struct BatchStatusResponse {
    status: String,
    #[serde(default)]
    results_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps a batch-system status string onto the job lifecycle.
pub fn map_batch_status(raw: &str) -> Result<PredictionJobStatus, AdvanceError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pending" | "queued" => Ok(PredictionJobStatus::Pending),
        "running" | "active" => Ok(PredictionJobStatus::Running),
        "completed" | "succeeded" => Ok(PredictionJobStatus::Completed),
        "failed" | "error" => Ok(PredictionJobStatus::Failed),
        _ => Err(AdvanceError::UnknownStatus(raw.to_string())),
    }
}

/// Advancer that polls a JSON status endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBatchAdvancer {
    client: Client,
    token: Option<String>,
}

impl HttpBatchAdvancer {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn apply(job: &PredictionJob, response: BatchStatusResponse) -> Result<PredictionJob, AdvanceError> {
        let mut updated = job.clone();
        updated.status = map_batch_status(&response.status)?;
        if response.results_url.is_some() {
            updated.results_url = response.results_url;
        }
        if response.message.is_some() {
            updated.message = response.message;
        }
        Ok(updated)
    }
}

#[async_trait]
impl BatchAdvancer for HttpBatchAdvancer {
    async fn advance(&self, job: &PredictionJob) -> Result<PredictionJob, AdvanceError> {
        let url = job.service_job_url.clone();
        let mut request = self.client.get(&url);
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| AdvanceError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(AdvanceError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let body: BatchStatusResponse = response
            .json()
            .await
            .map_err(|e| AdvanceError::Decode(e.to_string()))?;

        debug!(
            prediction_job_id = job.id,
            batch_status = %body.status,
            "Fetched batch job status"
        );

        Self::apply(job, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn running_job() -> PredictionJob {
        PredictionJob {
            id: 1,
            service_job_url: "https://batch.example.org/jobs/1".to_string(),
            subject_set_id: "active-1".to_string(),
            results_url: None,
            status: PredictionJobStatus::Running,
            message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_map_batch_status() {
        assert_eq!(
            map_batch_status("queued").expect("known"),
            PredictionJobStatus::Pending
        );
        assert_eq!(
            map_batch_status("Active").expect("known"),
            PredictionJobStatus::Running
        );
        assert_eq!(
            map_batch_status("succeeded").expect("known"),
            PredictionJobStatus::Completed
        );
        assert_eq!(
            map_batch_status("error").expect("known"),
            PredictionJobStatus::Failed
        );
        assert!(matches!(
            map_batch_status("paused"),
            Err(AdvanceError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_apply_copies_results_url_and_message() {
        let response: BatchStatusResponse = serde_json::from_str(
            r#"{"status": "completed", "results_url": "https://blob/results.json", "message": "done"}"#,
        )
        .expect("response should parse");

        let updated = HttpBatchAdvancer::apply(&running_job(), response).expect("apply");
        assert_eq!(updated.status, PredictionJobStatus::Completed);
        assert_eq!(
            updated.results_url.as_deref(),
            Some("https://blob/results.json")
        );
        assert_eq!(updated.message.as_deref(), Some("done"));
    }

    #[test]
    fn test_apply_keeps_existing_fields_when_absent() {
        let mut job = running_job();
        job.message = Some("queued on pool".to_string());

        let response: BatchStatusResponse =
            serde_json::from_str(r#"{"status": "running"}"#).expect("response should parse");

        let updated = HttpBatchAdvancer::apply(&job, response).expect("apply");
        assert_eq!(updated.status, PredictionJobStatus::Running);
        assert!(updated.results_url.is_none());
        assert_eq!(updated.message.as_deref(), Some("queued on pool"));
    }
}
