//! Error types for the scheduler.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::JobId;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Persisting job metadata failed.
    #[error("job store error: {0}")]
    Store(#[from] StoreError),

    /// The job has nothing to execute.
    #[error("job has no action attached: {0}")]
    MissingAction(String),

    /// The job was logically deleted and may not run again.
    #[error("job {0} has been deleted")]
    Deleted(JobId),

    /// The store handed the job back without an id, so the queue cannot tell
    /// it apart from other jobs.
    #[error("job store assigned no id to job: {0}")]
    UnassignedId(String),
}
