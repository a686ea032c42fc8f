//! Job definitions for the scheduler.
//!
//! This module defines the envelope stored in Redis queues:
//!
//! - `QueuedJob`: A unit of work with retry bookkeeping
//! - `JobPayload`: What the unit of work does

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::SubjectAssignment;

/// Default maximum number of attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// The work a queued job carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Poll a prediction job once and reschedule or process its results.
    MonitorPrediction { prediction_job_id: i64 },
    /// Add one subject to an active subject set. Consumed downstream.
    AddSubjectToSubjectSet(SubjectAssignment),
}

impl JobPayload {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::MonitorPrediction { .. } => "monitor_prediction",
            JobPayload::AddSubjectToSubjectSet(_) => "add_subject_to_subject_set",
        }
    }
}

/// A job envelope stored in a Redis queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Unique identifier for this envelope.
    pub id: Uuid,
    /// The work to perform.
    pub payload: JobPayload,
    /// When this envelope was created.
    pub created_at: DateTime<Utc>,
    /// Number of times this job has been attempted.
    pub attempts: u32,
    /// Maximum number of attempts before moving to the dead letter queue.
    pub max_attempts: u32,
}

impl QueuedJob {
    /// Creates a new job with default retry settings.
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Creates a monitor invocation for a prediction job.
    pub fn monitor(prediction_job_id: i64) -> Self {
        Self::new(JobPayload::MonitorPrediction { prediction_job_id })
    }

    /// Creates an active-set assignment job.
    pub fn assignment(assignment: SubjectAssignment) -> Self {
        Self::new(JobPayload::AddSubjectToSubjectSet(assignment))
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Increments the attempt counter.
    ///
    /// This should be called before each execution attempt.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Returns whether the job should be retried after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Returns the number of remaining attempts.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Key under which concurrent executions of the same work are serialized.
    ///
    /// Only monitor invocations need exclusion; assignments are idempotent.
    pub fn lock_key(&self) -> Option<String> {
        match &self.payload {
            JobPayload::MonitorPrediction { prediction_job_id } => {
                Some(format!("prediction_job:{}", prediction_job_id))
            }
            JobPayload::AddSubjectToSubjectSet(_) => None,
        }
    }
}
