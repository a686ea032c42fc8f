//! prediction-feedback: active learning feedback loop for batch predictions.
//!
//! Monitors external batch prediction jobs until they finish, then selects
//! subjects from their results (confident ones plus a random exploration
//! sample of uncertain ones) and hands them to an active subject set.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod labels;
pub mod monitor;
pub mod results;
pub mod scheduler;
pub mod storage;

// Re-export commonly used error types
pub use error::{DispatchError, FetchError, LabelError, ParseError, ResultsError};
