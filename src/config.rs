//! Configuration for the feedback loop.
//!
//! Covers the result-processing policy (probability threshold and
//! exploration rate), monitor rescheduling, queue and storage locations, and
//! worker pool sizing.

use std::time::Duration;
use thiserror::Error;

/// Default probability at or above which a subject counts as confident.
pub const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.8;

/// Default fraction of uncertain subjects sampled back into the active set.
pub const DEFAULT_RANDOMISATION_FACTOR: f64 = 0.1;

/// Default monitor reschedule delay, in minutes.
pub const DEFAULT_RESCHEDULE_DELAY_MINUTES: u64 = 1;

/// Longest accepted monitor reschedule delay: one week.
pub const MAX_RESCHEDULE_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the monitor, result processing and worker pool.
#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    // Result processing
    /// Probability at or above which a subject is dispatched unconditionally.
    pub probability_threshold: f64,
    /// Fraction of the uncertain subjects sampled for exploration.
    pub randomisation_factor: f64,

    // Monitor
    /// Delay before the monitor polls an unfinished job again.
    pub monitor_reschedule_delay: Duration,

    // Queues
    /// Redis connection URL.
    pub redis_url: String,
    /// Queue holding monitor invocations.
    pub monitor_queue_name: String,
    /// Queue receiving active-set subject assignments.
    pub active_set_queue_name: String,

    // Storage
    /// SQLite URL of the prediction job store.
    pub database_url: String,

    // Workers
    /// Number of monitor workers.
    pub num_workers: usize,
    /// Maximum attempts for a failing monitor invocation before dead-lettering.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            probability_threshold: DEFAULT_PROBABILITY_THRESHOLD,
            randomisation_factor: DEFAULT_RANDOMISATION_FACTOR,

            monitor_reschedule_delay: Duration::from_secs(DEFAULT_RESCHEDULE_DELAY_MINUTES * 60),

            redis_url: "redis://localhost:6379".to_string(),
            monitor_queue_name: "prediction_monitor".to_string(),
            active_set_queue_name: "active_set".to_string(),

            database_url: "sqlite://prediction_jobs.db".to_string(),

            num_workers: 2,
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(30),
        }
    }
}

impl FeedbackConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PROBABILITY_THRESHOLD`: confident cutoff (default: 0.8)
    /// - `RANDOMISATION_FACTOR`: exploration rate (default: 0.1)
    /// - `MONITOR_JOB_RESCHEDULE_DELAY`: reschedule delay in minutes (default: 1)
    /// - `REDIS_URL`: Redis URL (default: redis://localhost:6379)
    /// - `MONITOR_QUEUE_NAME`: monitor queue (default: prediction_monitor)
    /// - `ACTIVE_SET_QUEUE_NAME`: dispatch queue (default: active_set)
    /// - `DATABASE_URL`: job store URL (default: sqlite://prediction_jobs.db)
    /// - `NUM_WORKERS`: monitor workers (default: 2)
    /// - `JOB_MAX_ATTEMPTS`: attempts before dead-lettering (default: 5)
    /// - `JOB_RETRY_BASE_SECS`: retry backoff base in seconds (default: 30)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("PROBABILITY_THRESHOLD") {
            config.probability_threshold = parse_env_value(&val, "PROBABILITY_THRESHOLD")?;
        }

        if let Some(val) = lookup("RANDOMISATION_FACTOR") {
            config.randomisation_factor = parse_env_value(&val, "RANDOMISATION_FACTOR")?;
        }

        if let Some(val) = lookup("MONITOR_JOB_RESCHEDULE_DELAY") {
            let minutes: u64 = parse_env_value(&val, "MONITOR_JOB_RESCHEDULE_DELAY")?;
            let secs = minutes
                .checked_mul(60)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "MONITOR_JOB_RESCHEDULE_DELAY".to_string(),
                    message: format!("{} minutes is out of range", minutes),
                })?;
            config.monitor_reschedule_delay = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }

        if let Some(val) = lookup("MONITOR_QUEUE_NAME") {
            config.monitor_queue_name = val;
        }

        if let Some(val) = lookup("ACTIVE_SET_QUEUE_NAME") {
            config.active_set_queue_name = val;
        }

        if let Some(val) = lookup("DATABASE_URL") {
            config.database_url = val;
        }

        if let Some(val) = lookup("NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "NUM_WORKERS")?;
        }

        if let Some(val) = lookup("JOB_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "JOB_MAX_ATTEMPTS")?;
        }

        if let Some(val) = lookup("JOB_RETRY_BASE_SECS") {
            let secs: u64 = parse_env_value(&val, "JOB_RETRY_BASE_SECS")?;
            config.retry_base_delay = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.probability_threshold) {
            return Err(ConfigError::ValidationFailed(
                "probability_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.randomisation_factor) {
            return Err(ConfigError::ValidationFailed(
                "randomisation_factor must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.monitor_reschedule_delay > MAX_RESCHEDULE_DELAY {
            return Err(ConfigError::ValidationFailed(format!(
                "monitor_reschedule_delay must be at most {} minutes",
                MAX_RESCHEDULE_DELAY.as_secs() / 60
            )));
        }

        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.monitor_queue_name.is_empty() || self.active_set_queue_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue names cannot be empty".to_string(),
            ));
        }

        if self.monitor_queue_name == self.active_set_queue_name {
            return Err(ConfigError::ValidationFailed(
                "monitor_queue_name and active_set_queue_name must differ".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the probability threshold.
    pub fn with_probability_threshold(mut self, threshold: f64) -> Self {
        self.probability_threshold = threshold;
        self
    }

    /// Builder method to set the randomisation factor.
    pub fn with_randomisation_factor(mut self, factor: f64) -> Self {
        self.randomisation_factor = factor;
        self
    }

    /// Builder method to set the monitor reschedule delay.
    pub fn with_monitor_reschedule_delay(mut self, delay: Duration) -> Self {
        self.monitor_reschedule_delay = delay;
        self
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the number of workers.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Builder method to set the maximum attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
