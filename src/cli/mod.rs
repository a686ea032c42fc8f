//! Command-line interface for prediction-feedback.
//!
//! Provides the worker command plus one-shot commands for job registration,
//! result processing, and label schema inspection.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
