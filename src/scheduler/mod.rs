//! Redis-backed job scheduling for monitor invocations.
//!
//! - **JobQueue**: Redis queue with reliable dequeue (BRPOPLPUSH), delayed
//!   jobs in a sorted set, and per-key locks
//! - **WorkerPool**: Pool of workers that run monitor polls concurrently
//! - **QueuedJob**: Job envelope with retry bookkeeping
//!
//! # Architecture
//!
//! ```text
//!    create-job / monitor ──► {queue}            ◄── promote_due ── {queue}:scheduled
//!                                │                                       ▲
//!                                ▼                                       │
//!                    ┌──────────┬──────────┐                            │
//!                    ▼          ▼          ▼                            │
//!               ┌─────────┐┌─────────┐┌─────────┐   schedule_after      │
//!               │ Worker 1││ Worker 2││ Worker N│ ──────────────────────┘
//!               └─────────┘└─────────┘└─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use prediction_feedback::scheduler::{JobQueue, QueuedJob, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let queue = Arc::new(JobQueue::connect("redis://localhost:6379", "prediction_monitor").await?);
//! queue.enqueue(QueuedJob::monitor(42)).await?;
//!
//! let mut pool = WorkerPool::with_queue(WorkerPoolConfig::new(2), queue, monitor);
//! pool.start().await?;
//! pool.shutdown().await?;
//! ```
//!
//! # Reliability Features
//!
//! - **Atomic dequeue**: BRPOPLPUSH moves jobs to a processing list
//! - **Crash recovery**: Jobs left in the processing list are requeued on start
//! - **Backoff**: Failed jobs return to the scheduled set with doubling delays
//! - **Dead letter queue**: Jobs that exhaust their attempts are parked for analysis

pub mod job;
pub mod queue;
pub mod worker_pool;

pub use job::{JobPayload, QueuedJob, DEFAULT_MAX_ATTEMPTS};
pub use queue::{JobQueue, QueueError, QueueStats};
pub use worker_pool::{retry_delay, PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
