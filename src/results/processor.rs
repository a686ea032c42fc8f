//! Result processing for a completed prediction job.
//!
//! Fetches the job's result payload, partitions subjects by the probability
//! threshold, samples the uncertain ones for exploration, and dispatches
//! both selections to the active set: the confident subjects first, then the
//! sampled uncertain ones, as two bulk calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::FeedbackConfig;
use crate::dispatch::{assignments_for, ActiveSetDispatcher};
use crate::error::ResultsError;
use crate::monitor::ResultsPipeline;

use super::fetcher::{ResultFetcher, ResultSource};
use super::partition::ThresholdPartitioner;
use super::sampling::ExplorationSampler;

/// Counts describing one processed result payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    /// Subjects in the payload.
    pub subjects: usize,
    /// Subjects at or above the threshold, all dispatched.
    pub confident: usize,
    /// Subjects below the threshold.
    pub uncertain: usize,
    /// Uncertain subjects sampled and dispatched.
    pub sampled: usize,
}

impl ProcessSummary {
    /// Total subjects sent to the active set.
    pub fn dispatched(&self) -> usize {
        self.confident + self.sampled
    }
}

/// Runs fetch → partition → sample → dispatch for one result payload.
pub struct PredictionResultsProcessor {
    fetcher: Arc<dyn ResultSource>,
    partitioner: ThresholdPartitioner,
    sampler: ExplorationSampler,
    randomisation_factor: f64,
    dispatcher: Arc<dyn ActiveSetDispatcher>,
}

impl PredictionResultsProcessor {
    /// Creates a processor using the threshold and exploration rate from `config`.
    pub fn new(dispatcher: Arc<dyn ActiveSetDispatcher>, config: &FeedbackConfig) -> Self {
        Self {
            fetcher: Arc::new(ResultFetcher::new()),
            partitioner: ThresholdPartitioner::new(config.probability_threshold),
            sampler: ExplorationSampler::new(),
            randomisation_factor: config.randomisation_factor,
            dispatcher,
        }
    }

    /// Replaces the payload source.
    pub fn with_fetcher(mut self, fetcher: impl ResultSource + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// Replaces the exploration sampler, e.g. with a seeded one.
    pub fn with_sampler(mut self, sampler: ExplorationSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Processes the payload at `results_url` into `subject_set_id`.
    pub async fn run(
        &self,
        results_url: &str,
        subject_set_id: &str,
    ) -> Result<ProcessSummary, ResultsError> {
        let payload = self.fetcher.fetch(results_url).await?;
        let partitioned = self.partitioner.partition(&payload);
        let sampled = self
            .sampler
            .sample(&partitioned.uncertain, self.randomisation_factor);

        self.dispatcher
            .dispatch_bulk(assignments_for(&partitioned.confident, subject_set_id))
            .await?;
        self.dispatcher
            .dispatch_bulk(assignments_for(&sampled, subject_set_id))
            .await?;

        let summary = ProcessSummary {
            subjects: payload.len(),
            confident: partitioned.confident.len(),
            uncertain: partitioned.uncertain.len(),
            sampled: sampled.len(),
        };

        info!(
            results_url = %results_url,
            subject_set_id = %subject_set_id,
            threshold = self.partitioner.threshold(),
            subjects = summary.subjects,
            confident = summary.confident,
            uncertain = summary.uncertain,
            sampled = summary.sampled,
            "Dispatched prediction results to active set"
        );

        Ok(summary)
    }
}

#[async_trait]
impl ResultsPipeline for PredictionResultsProcessor {
    async fn process(
        &self,
        results_url: &str,
        subject_set_id: &str,
    ) -> Result<ProcessSummary, ResultsError> {
        self.run(results_url, subject_set_id).await
    }
}
