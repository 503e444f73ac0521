//! Job metadata persistence.
//!
//! The scheduler only records metadata here; the executable action never
//! reaches a store, so every job read back is inert.

mod memory;
mod noop;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Job, JobId};

pub use memory::MemoryJobStore;
pub use noop::NoopJobStore;
pub use sqlite::SqliteJobStore;

/// Errors that can occur within a job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    /// A job with this ID is already stored.
    #[error("Job already exists: {id}")]
    JobExists { id: JobId },

    /// A stored row could not be turned back into a job.
    #[error("Invalid job record: {0}")]
    InvalidRecord(String),

    /// The store's worker thread failed.
    #[error("Internal store error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence collaborator for job metadata.
///
/// Implementations must be safe to call from many workers at once; no
/// ordering is promised between writes for different jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job, assigning an id when it has none.
    ///
    /// An explicit id that is already stored is rejected with
    /// [`StoreError::JobExists`].
    ///
    /// Stamps `created_at`/`updated_at`, marks an `Unknown` delete state as
    /// `Active`, and returns the stored job with its action still attached.
    async fn create_job(&self, job: Job) -> Result<Job>;

    /// Overwrite the mutable fields of an existing job and stamp
    /// `updated_at`. The delete flag is left to [`JobStore::remove_job`].
    async fn update_job(&self, id: JobId, job: &Job) -> Result<()>;

    /// Logically delete a job.
    async fn remove_job(&self, id: JobId) -> Result<()>;

    /// Load one job's metadata.
    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Load every job's metadata ordered by id, deleted ones included.
    async fn list_jobs(&self) -> Result<Vec<Job>>;
}
