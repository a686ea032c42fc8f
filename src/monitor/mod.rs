//! Prediction job monitoring.
//!
//! Tracks an external batch prediction job to completion by repeated,
//! self-rescheduling polls, then runs result processing exactly once.
//!
//! ```text
//!   poll(job_id)
//!       │
//!       ├─ completed on load ──► AlreadyCompleted
//!       │
//!       ▼
//!   advance (batch system)
//!       │
//!       ├─ pending/running/failed ──► save, schedule_after(delay) ──► Rescheduled
//!       └─ completed ───────────────► fetch → partition → sample → dispatch, save ──► Processed
//! ```
//!
//! Collaborators sit behind traits ([`crate::storage::JobStore`],
//! [`BatchAdvancer`], [`MonitorScheduler`], [`ResultsPipeline`]) so the
//! control flow runs against fakes in tests.

pub mod advance;
pub mod decision;
pub mod job_monitor;
pub mod types;

pub use advance::{map_batch_status, AdvanceError, BatchAdvancer, HttpBatchAdvancer};
pub use decision::{transition, InvalidTransition, MonitorAction, Transition};
pub use job_monitor::{
    JobCompletionMonitor, MonitorError, MonitorScheduler, PollOutcome, ResultsPipeline,
};
pub use types::{NewPredictionJob, PredictionJob, PredictionJobStatus};
