//! Active-set dispatch.
//!
//! Subjects selected by result processing are handed to an
//! [`ActiveSetDispatcher`] in bulk. Dispatch is one-way: the queue-backed
//! implementation only enqueues assignment jobs for a downstream consumer and
//! never waits for them to run. Adding a subject to a set is idempotent
//! downstream, so re-dispatching after a retry is harmless.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DispatchError;
use crate::scheduler::{JobQueue, QueuedJob};

/// One subject destined for one subject set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubjectAssignment {
    pub subject_id: String,
    pub subject_set_id: String,
}

impl SubjectAssignment {
    pub fn new(subject_id: impl Into<String>, subject_set_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            subject_set_id: subject_set_id.into(),
        }
    }
}

/// Pairs every subject in `subject_ids` with `subject_set_id`.
pub fn assignments_for(
    subject_ids: &BTreeSet<String>,
    subject_set_id: &str,
) -> Vec<SubjectAssignment> {
    subject_ids
        .iter()
        .map(|subject_id| SubjectAssignment::new(subject_id.as_str(), subject_set_id))
        .collect()
}

/// Bulk submission of subjects into the active working set.
#[async_trait]
pub trait ActiveSetDispatcher: Send + Sync {
    /// Submits one batch of assignments. An empty batch is allowed.
    async fn dispatch_bulk(&self, assignments: Vec<SubjectAssignment>)
        -> Result<(), DispatchError>;
}

/// Dispatcher that enqueues one assignment job per subject on a Redis queue.
pub struct QueueDispatcher {
    queue: Arc<JobQueue>,
}

impl QueueDispatcher {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ActiveSetDispatcher for QueueDispatcher {
    async fn dispatch_bulk(
        &self,
        assignments: Vec<SubjectAssignment>,
    ) -> Result<(), DispatchError> {
        let count = assignments.len();
        let jobs: Vec<QueuedJob> = assignments.into_iter().map(QueuedJob::assignment).collect();

        self.queue.enqueue_batch(jobs).await?;

        debug!(
            queue = %self.queue.queue_name(),
            assignments = count,
            "Enqueued active set assignments"
        );
        Ok(())
    }
}
