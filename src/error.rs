//! Error types for prediction-feedback operations.
//!
//! Defines the error types shared across subsystems:
//! - Result payload transfer and parsing
//! - Active-set dispatch
//! - Label taxonomy lookups
//!
//! Queue, storage, monitor and configuration errors live next to the code
//! that raises them.

use thiserror::Error;

use crate::scheduler::QueueError;

/// Errors raised while copying a result payload into scratch storage.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request for '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Remote returned HTTP {status} for '{url}'")]
    Status { url: String, status: u16 },

    #[error("Unsupported location scheme '{scheme}' in '{location}'")]
    UnsupportedScheme { location: String, scheme: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while parsing a result payload.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload has no 'data' object")]
    MissingData,

    #[error("Probability for '{subject_id}' is not a number: {value}")]
    NotANumber { subject_id: String, value: String },

    #[error("Probability for '{subject_id}' is outside [0, 1]: {value}")]
    OutOfRange { subject_id: String, value: f64 },
}

/// Errors raised by the active-set dispatcher transport.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The assignment queue rejected the batch.
    #[error("Bulk enqueue failed: {0}")]
    Queue(#[from] QueueError),

    /// Any other dispatcher's transport failure.
    #[error("Bulk enqueue failed: {0}")]
    Enqueue(String),
}

/// Errors that can occur while processing the results of a prediction job.
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Errors raised by label taxonomy lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("key not found: {0}")]
    UnknownTaskKey(String),

    #[error("key not found: {0}")]
    UnknownLabelKey(String),
}
