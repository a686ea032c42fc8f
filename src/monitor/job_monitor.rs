//! The job-completion monitor.
//!
//! One call to [`JobCompletionMonitor::poll`] is one short, bounded poll
//! cycle. An unfinished job re-arms the chain through the scheduler instead
//! of waiting, so no worker is held while the batch job runs. Errors are
//! never swallowed here; the worker pool decides whether to retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ResultsError;
use crate::results::ProcessSummary;
use crate::scheduler::QueueError;
use crate::storage::{JobStore, StoreError};

use super::advance::{AdvanceError, BatchAdvancer};
use super::decision::{transition, InvalidTransition, MonitorAction};
use super::types::{PredictionJob, PredictionJobStatus};

/// Enqueues a future poll of a prediction job.
#[async_trait]
pub trait MonitorScheduler: Send + Sync {
    async fn schedule_after(&self, delay: Duration, prediction_job_id: i64)
        -> Result<(), QueueError>;
}

/// Processes the results of a completed prediction job.
#[async_trait]
pub trait ResultsPipeline: Send + Sync {
    async fn process(
        &self,
        results_url: &str,
        subject_set_id: &str,
    ) -> Result<ProcessSummary, ResultsError>;
}

/// Errors that can occur during a poll cycle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Advance failed: {0}")]
    Advance(#[from] AdvanceError),

    #[error("Result processing failed: {0}")]
    Results(#[from] ResultsError),

    #[error("Reschedule failed: {0}")]
    Schedule(#[from] QueueError),

    #[error("Prediction job {job_id}: {source}")]
    InvalidTransition {
        job_id: i64,
        #[source]
        source: InvalidTransition,
    },

    #[error("Prediction job {0} completed without a results_url")]
    MissingResultsUrl(i64),
}

/// How a poll cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The job was already completed when loaded; nothing ran.
    AlreadyCompleted(PredictionJob),
    /// The job has not completed and another poll is scheduled.
    Rescheduled { job: PredictionJob, delay: Duration },
    /// The job completed during this cycle and its results were dispatched.
    Processed {
        job: PredictionJob,
        summary: ProcessSummary,
    },
}

impl PollOutcome {
    /// Short name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::AlreadyCompleted(_) => "already_completed",
            PollOutcome::Rescheduled { .. } => "rescheduled",
            PollOutcome::Processed { .. } => "processed",
        }
    }

    /// The job as it stands after the cycle.
    pub fn job(&self) -> &PredictionJob {
        match self {
            PollOutcome::AlreadyCompleted(job)
            | PollOutcome::Rescheduled { job, .. }
            | PollOutcome::Processed { job, .. } => job,
        }
    }
}

/// Polls prediction jobs until they finish, then hands off their results.
pub struct JobCompletionMonitor {
    store: Arc<dyn JobStore>,
    advancer: Arc<dyn BatchAdvancer>,
    scheduler: Arc<dyn MonitorScheduler>,
    pipeline: Arc<dyn ResultsPipeline>,
    reschedule_delay: Duration,
}

impl JobCompletionMonitor {
    pub fn new(
        store: Arc<dyn JobStore>,
        advancer: Arc<dyn BatchAdvancer>,
        scheduler: Arc<dyn MonitorScheduler>,
        pipeline: Arc<dyn ResultsPipeline>,
        reschedule_delay: Duration,
    ) -> Self {
        Self {
            store,
            advancer,
            scheduler,
            pipeline,
            reschedule_delay,
        }
    }

    pub fn reschedule_delay(&self) -> Duration {
        self.reschedule_delay
    }

    /// Runs one poll cycle for `prediction_job_id`.
    ///
    /// A job already completed when loaded is returned unchanged without
    /// touching any collaborator. Every other status, `Failed` included, is
    /// advanced and rescheduled until the batch system reports completion.
    /// A job that completes during this cycle is saved only after its results
    /// are processed, so a failed pipeline leaves it eligible for a retry.
    pub async fn poll(&self, prediction_job_id: i64) -> Result<PollOutcome, MonitorError> {
        let job = self.store.load(prediction_job_id).await?;

        if job.is_completed() {
            debug!(prediction_job_id, "Prediction job already completed, skipping poll");
            return Ok(PollOutcome::AlreadyCompleted(job));
        }

        let previous = job.status;
        let mut advanced = self.advancer.advance(&job).await?;
        let step = transition(previous, advanced.status, self.reschedule_delay).map_err(
            |source| MonitorError::InvalidTransition {
                job_id: prediction_job_id,
                source,
            },
        )?;
        advanced.status = step.status;
        advanced.touch();

        match step.action {
            MonitorAction::Reschedule(delay) => {
                self.store.save(&advanced).await?;
                self.scheduler
                    .schedule_after(delay, prediction_job_id)
                    .await?;

                if advanced.status == PredictionJobStatus::Failed {
                    warn!(
                        prediction_job_id,
                        message = ?advanced.message,
                        "Prediction job reported failed, still polling"
                    );
                }
                debug!(
                    prediction_job_id,
                    status = %advanced.status,
                    delay_secs = delay.as_secs(),
                    "Prediction job not completed, rescheduled monitor"
                );
                Ok(PollOutcome::Rescheduled {
                    job: advanced,
                    delay,
                })
            }
            MonitorAction::RunPipeline => {
                let results_url = advanced
                    .results_url
                    .clone()
                    .ok_or(MonitorError::MissingResultsUrl(prediction_job_id))?;

                let summary = self
                    .pipeline
                    .process(&results_url, &advanced.subject_set_id)
                    .await?;
                self.store.save(&advanced).await?;

                info!(
                    prediction_job_id,
                    dispatched = summary.dispatched(),
                    "Prediction job completed, results dispatched"
                );
                Ok(PollOutcome::Processed {
                    job: advanced,
                    summary,
                })
            }
        }
    }
}
