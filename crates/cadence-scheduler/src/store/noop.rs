//! Store that records nothing.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::{JobStore, Result};
use crate::types::{DeleteState, Job, JobId};

/// Accepts every write and keeps nothing. Handy when metadata is not needed.
#[derive(Debug)]
pub struct NoopJobStore {
    next_id: AtomicU64,
}

impl NoopJobStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for NoopJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for NoopJobStore {
    async fn create_job(&self, mut job: Job) -> Result<Job> {
        if !job.id.is_assigned() {
            job.id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;
        if job.deleted == DeleteState::Unknown {
            job.deleted = DeleteState::Active;
        }
        Ok(job)
    }

    async fn update_job(&self, _id: JobId, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn remove_job(&self, _id: JobId) -> Result<()> {
        Ok(())
    }

    async fn get_job(&self, _id: JobId) -> Result<Option<Job>> {
        Ok(None)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(Vec::new())
    }
}
