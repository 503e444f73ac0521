//! In-process job store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{JobStore, Result, StoreError};
use crate::types::{DeleteState, Job, JobId};

/// Keeps job metadata in a concurrent map. Nothing survives the process.
#[derive(Debug)]
pub struct MemoryJobStore {
    jobs: DashMap<JobId, Job>,
    next_id: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, mut job: Job) -> Result<Job> {
        if job.id.is_assigned() {
            self.next_id.fetch_max(job.id.0 + 1, Ordering::SeqCst);
        } else {
            job.id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        }

        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;
        if job.deleted == DeleteState::Unknown {
            job.deleted = DeleteState::Active;
        }

        let mut record = job.clone();
        record.action = None;
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(StoreError::JobExists { id: job.id }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(job)
            }
        }
    }

    async fn update_job(&self, id: JobId, job: &Job) -> Result<()> {
        let mut record = self
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound { id })?;

        record.name = job.name.clone();
        record.retry_times = job.retry_times;
        record.run_once = job.run_once;
        record.interval = job.interval;
        record.last_finished_at = job.last_finished_at;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_job(&self, id: JobId) -> Result<()> {
        let mut record = self
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound { id })?;

        record.deleted = DeleteState::Deleted;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).map(|record| record.clone()))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }
}
