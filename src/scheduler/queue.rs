//! Redis-based job queue with delayed scheduling and reliable dequeue.
//!
//! This module provides a distributed job queue backed by Redis that supports:
//!
//! - Atomic dequeue using BRPOPLPUSH
//! - Delay-based scheduling through a sorted set
//! - Retry with backoff and a dead letter queue
//! - Per-key locks so one unit of work never runs twice at once
//!
//! # Queue Structure
//!
//! - `{queue_name}`: Main queue where ready jobs wait
//! - `{queue_name}:processing`: Jobs being processed (for crash recovery)
//! - `{queue_name}:scheduled`: Sorted set of delayed jobs, scored by due time (epoch ms)
//! - `{queue_name}:dead_letter`: Jobs that failed after max attempts
//! - `{queue_name}:lock:{key}`: Short-lived exclusion locks

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::monitor::MonitorScheduler;

use super::job::{QueuedJob, DEFAULT_MAX_ATTEMPTS};

/// Maximum number of delayed jobs moved to the main queue per promotion.
const PROMOTE_BATCH_SIZE: usize = 100;

/// Moves due members of the scheduled set onto the main queue atomically.
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(due) do
    redis.call('ZREM', KEYS[1], member)
    redis.call('LPUSH', KEYS[2], member)
end
return #due
"#;

/// Deletes a lock only while it still holds the caller's token.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Redis-based job queue.
pub struct JobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name of the main queue.
    queue_name: String,
    /// Name of the processing queue.
    processing_queue: String,
    /// Name of the delayed job sorted set.
    scheduled_set: String,
    /// Name of the dead letter queue.
    dead_letter_queue: String,
    /// Attempt budget given to monitor jobs this queue creates.
    max_attempts: u32,
}

impl JobQueue {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a JobQueue from an existing ConnectionManager.
    ///
    /// Useful when several queues share one connection.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        let keys = QueueKeys::new(queue_name);
        Self {
            redis,
            queue_name: keys.queue,
            processing_queue: keys.processing,
            scheduled_set: keys.scheduled,
            dead_letter_queue: keys.dead_letter,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the attempt budget for monitor jobs scheduled through this queue.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Enqueues a job for immediate execution.
    pub async fn enqueue(&self, job: QueuedJob) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(&job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    /// Enqueues multiple jobs in a single round trip.
    pub async fn enqueue_batch(&self, jobs: Vec<QueuedJob>) -> Result<(), QueueError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let serialized: Result<Vec<String>, _> = jobs.iter().map(serde_json::to_string).collect();
        let serialized = serialized?;

        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        for job_data in &serialized {
            pipe.lpush(&self.queue_name, job_data).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Schedules a job to become ready after `delay`.
    ///
    /// Nothing waits on the delay: the job sits in the scheduled set until a
    /// worker promotes it with [`JobQueue::promote_due`].
    pub async fn schedule(&self, job: QueuedJob, delay: Duration) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(&job)?;
        let due_at = due_at_millis(delay);

        let mut conn = self.redis.clone();
        conn.zadd::<_, _, _, ()>(&self.scheduled_set, serialized, due_at)
            .await?;

        debug!(
            queue = %self.queue_name,
            job_id = %job.id,
            delay_secs = delay.as_secs(),
            "Scheduled job"
        );
        Ok(())
    }

    /// Moves scheduled jobs whose due time has passed onto the main queue.
    ///
    /// Returns the number of promoted jobs.
    pub async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let script = redis::Script::new(PROMOTE_DUE_SCRIPT);
        let promoted: usize = script
            .key(&self.scheduled_set)
            .key(&self.queue_name)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH_SIZE)
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    /// Dequeues the next job, blocking until one is available or timeout.
    ///
    /// Uses BRPOPLPUSH so the job sits in the processing queue while it runs.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(job))` if a job was dequeued
    /// - `Ok(None)` if the timeout expired with no jobs available
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => {
                let job: QueuedJob = serde_json::from_str(&data)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Removes a finished job from the processing queue.
    pub async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.remove_job_from_processing(job_id).await
    }

    /// Moves a failed job back into the scheduled set to run after `delay`.
    ///
    /// The job's attempt counter should be incremented before calling this.
    pub async fn retry_later(&self, job: QueuedJob, delay: Duration) -> Result<(), QueueError> {
        self.remove_job_from_processing(job.id).await?;
        self.schedule(job, delay).await
    }

    /// Moves a job to the dead letter queue after exhausting retry attempts.
    pub async fn dead_letter(&self, job: QueuedJob, error: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        self.remove_job_from_processing(job.id).await?;

        let dead_letter_entry = serde_json::json!({
            "job": job,
            "error": error,
            "moved_at": Utc::now().to_rfc3339(),
        });
        let serialized = serde_json::to_string(&dead_letter_entry)?;

        conn.lpush::<_, _, ()>(&self.dead_letter_queue, serialized)
            .await?;

        Ok(())
    }

    /// Takes the lock `key` for `ttl`, returning the release token on success.
    ///
    /// `Ok(None)` means another holder owns the lock.
    pub async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    /// Releases the lock `key` if `token` still owns it.
    pub async fn unlock(&self, key: &str, token: &str) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let script = redis::Script::new(RELEASE_LOCK_SCRIPT);
        let removed: i64 = script
            .key(self.lock_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    /// Moves jobs left in the processing list by a crashed worker back to
    /// the main queue, or to the dead letter queue once their attempts are
    /// spent. Returns how many were requeued.
    pub async fn recover_processing_jobs(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let jobs: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for job_data in jobs {
            if let Ok(mut job) = serde_json::from_str::<QueuedJob>(&job_data) {
                // A crash mid-run counts as an attempt
                job.increment_attempts();

                if job.should_retry() {
                    let serialized = serde_json::to_string(&job)?;

                    let mut pipe = redis::pipe();
                    pipe.atomic()
                        .lrem(&self.processing_queue, 1, &job_data)
                        .rpush(&self.queue_name, &serialized);
                    pipe.query_async::<_, ()>(&mut conn).await?;

                    recovered += 1;
                } else {
                    self.dead_letter(job, "Recovered from processing queue after max attempts")
                        .await?;
                }
            }
        }

        Ok(recovered)
    }

    /// Returns queue statistics, read in one round trip.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.redis.clone();

        let (pending_jobs, processing_jobs, scheduled_jobs, dead_letter_jobs): (
            usize,
            usize,
            usize,
            usize,
        ) = redis::pipe()
            .llen(&self.queue_name)
            .llen(&self.processing_queue)
            .zcard(&self.scheduled_set)
            .llen(&self.dead_letter_queue)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending_jobs,
            processing_jobs,
            scheduled_jobs,
            dead_letter_jobs,
        })
    }

    /// Helper to remove a job from the processing queue by ID.
    async fn remove_job_from_processing(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let jobs: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for job_data in jobs {
            if let Ok(job) = serde_json::from_str::<QueuedJob>(&job_data) {
                if job.id == job_id {
                    conn.lrem::<_, _, ()>(&self.processing_queue, 1, &job_data)
                        .await?;
                    return Ok(());
                }
            }
        }

        // Already gone.
        Ok(())
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.queue_name, key)
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl MonitorScheduler for JobQueue {
    async fn schedule_after(&self, delay: Duration, prediction_job_id: i64) -> Result<(), QueueError> {
        let job = QueuedJob::monitor(prediction_job_id).with_max_attempts(self.max_attempts);
        self.schedule(job, delay).await
    }
}

/// Redis key names derived from a queue name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKeys {
    queue: String,
    processing: String,
    scheduled: String,
    dead_letter: String,
}

impl QueueKeys {
    fn new(queue_name: &str) -> Self {
        Self {
            queue: queue_name.to_string(),
            processing: format!("{}:processing", queue_name),
            scheduled: format!("{}:scheduled", queue_name),
            dead_letter: format!("{}:dead_letter", queue_name),
        }
    }
}

fn due_at_millis(delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(delay_ms)
}

/// Statistics about queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Name of the queue.
    pub queue_name: String,
    /// Number of jobs ready to be processed.
    pub pending_jobs: usize,
    /// Number of jobs currently being processed.
    pub processing_jobs: usize,
    /// Number of jobs waiting for their due time.
    pub scheduled_jobs: usize,
    /// Number of jobs in the dead letter queue.
    pub dead_letter_jobs: usize,
}

impl QueueStats {
    /// Returns the total number of jobs in all queues.
    pub fn total_jobs(&self) -> usize {
        self.pending_jobs + self.processing_jobs + self.scheduled_jobs + self.dead_letter_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_queue_keys() {
        let keys = QueueKeys::new("prediction_monitor");

        assert_eq!(keys.queue, "prediction_monitor");
        assert_eq!(keys.processing, "prediction_monitor:processing");
        assert_eq!(keys.scheduled, "prediction_monitor:scheduled");
        assert_eq!(keys.dead_letter, "prediction_monitor:dead_letter");
    }

    #[test]
    fn test_due_at_is_in_the_future() {
        let now = Utc::now().timestamp_millis();
        let due = due_at_millis(Duration::from_secs(60));

        assert!(due >= now + 60_000);
        assert!(due < now + 61_000);
    }

    #[test]
    fn test_due_at_saturates_on_huge_delay() {
        let now = Utc::now().timestamp_millis();

        assert_eq!(due_at_millis(Duration::MAX), i64::MAX);
        assert!(due_at_millis(Duration::from_secs(200_000_000_000_000 * 60)) > now);
    }

    #[test]
    fn test_queue_stats() {
        let stats = QueueStats {
            queue_name: "test".to_string(),
            pending_jobs: 10,
            processing_jobs: 5,
            scheduled_jobs: 3,
            dead_letter_jobs: 2,
        };

        assert_eq!(stats.total_jobs(), 20);
    }

    #[test]
    fn test_dead_letter_entry_structure() {
        let job = QueuedJob::monitor(3);

        let entry = serde_json::json!({
            "job": job,
            "error": "advance failed",
            "moved_at": Utc::now().to_rfc3339(),
        });

        let parsed: serde_json::Value =
            serde_json::from_str(&entry.to_string()).expect("should parse back");

        assert_eq!(parsed["job"]["payload"]["prediction_job_id"], 3);
        assert_eq!(parsed["error"], "advance failed");
        assert!(parsed.get("moved_at").is_some());
    }
}
