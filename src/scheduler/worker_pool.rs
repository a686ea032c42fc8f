//! Worker pool for processing monitor invocations from a Redis queue.
//!
//! Each worker runs as an independent async task. On every turn it promotes
//! due delayed jobs, then pulls the next ready job.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Exponential retry backoff on failure
//! - Dead letter queue for jobs that exhaust their attempts
//! - Per-prediction-job locks so duplicate invocations never overlap
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::FeedbackConfig;
use crate::monitor::{JobCompletionMonitor, PollOutcome};

use super::job::{JobPayload, QueuedJob};
use super::queue::{JobQueue, QueueError};

/// Upper bound for a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Extra lock lifetime beyond the job timeout.
const LOCK_GRACE: Duration = Duration::from_secs(30);

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// A job ran longer than the allowed time.
    #[error("Job timed out after {0:?}")]
    JobTimeout(Duration),

    /// The monitor returned an error.
    #[error("Monitor error: {0}")]
    MonitorError(String),

    /// The job carries a payload this pool does not execute.
    #[error("Unsupported job payload: {0}")]
    UnsupportedPayload(&'static str),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Name of the job queue.
    pub queue_name: String,
    /// How long a dequeue blocks when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum time allowed for processing a single job.
    pub job_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// First retry delay; doubles on each subsequent attempt.
    pub retry_base_delay: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            queue_name: "prediction_monitor".to_string(),
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(60),
            retry_base_delay: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Derives pool settings from the service configuration.
    pub fn from_feedback(config: &FeedbackConfig) -> Self {
        Self {
            num_workers: config.num_workers,
            queue_name: config.monitor_queue_name.clone(),
            retry_base_delay: config.retry_base_delay,
            ..Default::default()
        }
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the base retry delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`,
/// capped at one hour.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Total number of jobs completed successfully.
    pub jobs_completed: u64,
    /// Total number of jobs that failed.
    pub jobs_failed: u64,
    /// Invocations skipped because another worker held the job's lock.
    pub jobs_skipped: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_skipped: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_skipped: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_skip(&self) {
        self.jobs_skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let skipped = self.jobs_skipped.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_skipped: skipped,
            average_job_duration: average_duration,
        }
    }
}

/// Worker pool that runs monitor invocations from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    monitor: Arc<JobCompletionMonitor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a worker pool on an existing queue connection.
    ///
    /// The monitor usually reschedules onto this same queue.
    pub fn with_queue(
        config: WorkerPoolConfig,
        queue: Arc<JobQueue>,
        monitor: Arc<JobCompletionMonitor>,
    ) -> Self {
        // Only one shutdown signal is ever sent.
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            monitor,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.queue.recover_processing_jobs().await {
            Ok(recovered) if recovered > 0 => {
                info!(recovered = recovered, "Recovered jobs from processing queue");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to recover processing jobs");
            }
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                monitor: Arc::clone(&self.monitor),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                job_timeout: self.config.job_timeout,
                retry_base_delay: self.config.retry_base_delay,
                stats: Arc::clone(&self.stats),
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            num_workers = self.config.num_workers,
            queue = %self.config.queue_name,
            "Worker pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish their current job before stopping.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may already have stopped.
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single worker that processes jobs from the queue.
struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    monitor: Arc<JobCompletionMonitor>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    retry_base_delay: Duration,
    stats: Arc<SharedPoolStats>,
}

/// What happened to one dequeued job.
enum Execution {
    Done(PollOutcome),
    Skipped,
}

impl Worker {
    /// Main worker loop. Runs until a shutdown signal is received.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.promote_due().await {
                Ok(promoted) if promoted > 0 => {
                    debug!(worker_id = %self.id, promoted, "Promoted due jobs");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to promote due jobs");
                }
            }

            match self.queue.dequeue(self.poll_interval).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No jobs available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes a single job, then completes, retries or dead-letters it.
    async fn process_job(&self, mut job: QueuedJob) {
        let job_id = job.id;
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            kind = job.payload.kind(),
            attempt = job.attempts + 1,
            "Processing job"
        );

        self.stats.increment_active();
        job.increment_attempts();
        let result = self.execute(&job).await;
        let duration = start_time.elapsed();
        self.stats.decrement_active();

        match result {
            Ok(execution) => {
                if let Err(e) = self.queue.complete(job_id).await {
                    error!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        "Failed to mark job complete"
                    );
                }

                match execution {
                    Execution::Done(outcome) => {
                        self.stats.record_completion(duration);
                        info!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            prediction_job_id = outcome.job().id,
                            outcome = outcome.label(),
                            duration_ms = duration.as_millis() as u64,
                            "Job completed"
                        );
                    }
                    Execution::Skipped => {
                        self.stats.record_skip();
                        info!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            "Another invocation holds this prediction job, skipping"
                        );
                    }
                }
            }
            Err(PoolError::UnsupportedPayload(kind)) => {
                self.stats.record_failure(duration);
                error!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    kind,
                    "Job payload not handled here, moving to dead letter queue"
                );
                let reason = PoolError::UnsupportedPayload(kind).to_string();
                self.move_to_dead_letter(job, &reason).await;
            }
            Err(e) => {
                self.stats.record_failure(duration);

                if job.should_retry() {
                    let delay = retry_delay(self.retry_base_delay, job.attempts);
                    warn!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        remaining_attempts = job.remaining_attempts(),
                        retry_in_secs = delay.as_secs(),
                        "Job failed, scheduling retry"
                    );

                    if let Err(retry_err) = self.queue.retry_later(job, delay).await {
                        error!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %retry_err,
                            "Failed to schedule retry"
                        );
                    }
                } else {
                    error!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        "Job failed, moving to dead letter queue"
                    );
                    self.move_to_dead_letter(job, &e.to_string()).await;
                }
            }
        }
    }

    async fn move_to_dead_letter(&self, job: QueuedJob, reason: &str) {
        let job_id = job.id;
        if let Err(dlq_err) = self.queue.dead_letter(job, reason).await {
            error!(
                worker_id = %self.id,
                job_id = %job_id,
                error = %dlq_err,
                "Failed to move job to dead letter queue"
            );
        }
    }

    /// Runs one monitor poll under the per-prediction-job lock.
    async fn execute(&self, job: &QueuedJob) -> Result<Execution, PoolError> {
        let prediction_job_id = match &job.payload {
            JobPayload::MonitorPrediction { prediction_job_id } => *prediction_job_id,
            other => return Err(PoolError::UnsupportedPayload(other.kind())),
        };

        let lock_key = match job.lock_key() {
            Some(key) => key,
            None => return Err(PoolError::UnsupportedPayload(job.payload.kind())),
        };
        let token = match self
            .queue
            .try_lock(&lock_key, self.job_timeout + LOCK_GRACE)
            .await?
        {
            Some(token) => token,
            None => return Ok(Execution::Skipped),
        };

        let result =
            tokio::time::timeout(self.job_timeout, self.monitor.poll(prediction_job_id)).await;

        if let Err(e) = self.queue.unlock(&lock_key, &token).await {
            warn!(
                worker_id = %self.id,
                lock = %lock_key,
                error = %e,
                "Failed to release lock, it will expire"
            );
        }

        match result {
            Ok(Ok(outcome)) => Ok(Execution::Done(outcome)),
            Ok(Err(e)) => Err(PoolError::MonitorError(e.to_string())),
            Err(_) => Err(PoolError::JobTimeout(self.job_timeout)),
        }
    }
}
