//! Prediction job records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an external batch prediction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PredictionJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionJobStatus::Pending => "pending",
            PredictionJobStatus::Running => "running",
            PredictionJobStatus::Completed => "completed",
            PredictionJobStatus::Failed => "failed",
        }
    }

    /// Returns whether a job may move from `self` to `next`.
    ///
    /// Staying put is always allowed. `Pending` and `Running` only move
    /// forward; a failed job may be resubmitted by the batch system and
    /// come back in any state.
    pub fn can_transition_to(&self, next: PredictionJobStatus) -> bool {
        use PredictionJobStatus::*;

        if *self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Running | Completed | Failed),
            Running => matches!(next, Completed | Failed),
            Failed => true,
            Completed => false,
        }
    }
}

impl fmt::Display for PredictionJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PredictionJobStatus::Pending),
            "running" => Ok(PredictionJobStatus::Running),
            "completed" => Ok(PredictionJobStatus::Completed),
            "failed" => Ok(PredictionJobStatus::Failed),
            other => Err(format!("unknown prediction job status '{}'", other)),
        }
    }
}

/// A batch prediction job tracked by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionJob {
    pub id: i64,
    /// Handle of the job in the external batch system.
    pub service_job_url: String,
    /// Active subject set receiving the selected subjects.
    pub subject_set_id: String,
    /// Location of the result payload, known once the batch job completes.
    pub results_url: Option<String>,
    pub status: PredictionJobStatus,
    /// Last status message reported by the batch system.
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PredictionJob {
    /// Marks the record as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_completed(&self) -> bool {
        self.status == PredictionJobStatus::Completed
    }
}

/// Fields needed to register a new prediction job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPredictionJob {
    pub service_job_url: String,
    pub subject_set_id: String,
}

impl NewPredictionJob {
    pub fn new(service_job_url: impl Into<String>, subject_set_id: impl Into<String>) -> Self {
        Self {
            service_job_url: service_job_url.into(),
            subject_set_id: subject_set_id.into(),
        }
    }
}
