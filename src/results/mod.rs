//! Prediction result processing.
//!
//! - **ResultFetcher**: copies a result payload to scratch storage and parses it
//! - **ThresholdPartitioner**: splits subjects into confident and uncertain sets
//! - **ExplorationSampler**: draws a random share of the uncertain subjects
//! - **PredictionResultsProcessor**: runs the three and dispatches the outcome
//!
//! # Example
//!
//! ```rust,ignore
//! use prediction_feedback::results::{partition, ExplorationSampler};
//!
//! let split = partition(&payload, 0.8);
//! let explore = ExplorationSampler::new().sample(&split.uncertain, 0.1);
//! ```

pub mod fetcher;
pub mod partition;
pub mod processor;
pub mod sampling;

pub use fetcher::{parse_payload, ResultFetcher, ResultPayload, ResultSource};
pub use partition::{partition, PartitionResult, ThresholdPartitioner};
pub use processor::{PredictionResultsProcessor, ProcessSummary};
pub use sampling::ExplorationSampler;
