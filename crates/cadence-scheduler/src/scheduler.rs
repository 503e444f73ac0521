//! Job scheduler implementation.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::delaying::DelayingQueue;
use crate::processor::Processor;
use crate::retry::{ExponentialRetry, RetryPolicy};
use crate::store::{JobStore, MemoryJobStore};
use crate::{Job, JobId, SchedulerError};

/// Capacity of the delayed-add hand-off buffer.
pub const DEFAULT_QUEUE_BUFFER_SIZE: usize = 10;

/// Number of concurrent workers.
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Scheduler settings, fixed at construction.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Concurrent workers; 0 is treated as 1.
    pub worker_count: usize,
    /// Delayed adds that may queue up for the waiting loop; 0 is treated as 1.
    pub queue_buffer_size: usize,
    /// Delay schedule between failed attempts.
    pub retry_policy: Arc<dyn RetryPolicy>,
}

impl SchedulerConfig {
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_queue_buffer(mut self, size: usize) -> Self {
        self.queue_buffer_size = size;
        self
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    fn normalized(mut self) -> Self {
        if self.worker_count == 0 {
            warn!("worker_count of 0 configured, using 1");
            self.worker_count = 1;
        }
        if self.queue_buffer_size == 0 {
            warn!("queue_buffer_size of 0 configured, using 1");
            self.queue_buffer_size = 1;
        }
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_buffer_size: DEFAULT_QUEUE_BUFFER_SIZE,
            retry_policy: Arc::new(ExponentialRetry::default()),
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("worker_count", &self.worker_count)
            .field("queue_buffer_size", &self.queue_buffer_size)
            .finish_non_exhaustive()
    }
}

/// The job scheduler.
///
/// Share it behind an `Arc` to call [`Scheduler::close`] from another task
/// while [`Scheduler::start`] is running.
pub struct Scheduler {
    config: SchedulerConfig,
    processor: Processor,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Create a scheduler. Must be called from within a Tokio runtime.
    pub fn new(config: SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        let config = config.normalized();
        let queue = Arc::new(DelayingQueue::new(config.queue_buffer_size));
        let processor = Processor::new(store, queue, Arc::clone(&config.retry_policy));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            processor,
            shutdown_tx,
        }
    }

    /// Default settings with an in-memory store.
    pub fn with_defaults() -> Self {
        Self::new(SchedulerConfig::default(), Arc::new(MemoryJobStore::new()))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        self.processor.store()
    }

    /// Persist a job and queue it for immediate execution.
    ///
    /// Nothing is queued when persisting fails.
    #[tracing::instrument(skip(self, job), fields(name = %job.name))]
    pub async fn schedule_job(&self, job: Job) -> Result<JobId, SchedulerError> {
        if job.action.is_none() {
            return Err(SchedulerError::MissingAction(job.name));
        }

        let job = self.store().create_job(job).await?;
        if !job.id.is_assigned() {
            warn!("job store returned the job without an id");
            return Err(SchedulerError::UnassignedId(job.name));
        }
        let id = job.id;

        info!(
            job_id = %id,
            run_once = job.run_once,
            interval_ms = job.interval.as_millis() as u64,
            retry_times = job.retry_times,
            "job scheduled"
        );
        self.processor.queue().add(job);

        Ok(id)
    }

    /// Queue a job that is already persisted, such as one read back from
    /// the store with its action re-attached.
    ///
    /// Jobs without an id go through [`Scheduler::schedule_job`].
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, name = %job.name))]
    pub async fn resume_job(&self, job: Job) -> Result<JobId, SchedulerError> {
        if !job.id.is_assigned() {
            return self.schedule_job(job).await;
        }
        if job.action.is_none() {
            return Err(SchedulerError::MissingAction(job.name));
        }
        if job.is_deleted() {
            return Err(SchedulerError::Deleted(job.id));
        }

        // Fails with JobNotFound for ids the store has never seen.
        self.store().update_job(job.id, &job).await?;

        let id = job.id;
        info!("job resumed");
        self.processor.queue().add(job);
        Ok(id)
    }

    /// Logically delete a job. A copy already queued still runs once more
    /// but a recurring job is not rescheduled afterwards.
    pub async fn remove_job(&self, id: JobId) -> Result<(), SchedulerError> {
        self.store().remove_job(id).await?;
        info!(job_id = %id, "job removed");
        Ok(())
    }

    /// Run the workers until [`Scheduler::close`] is called.
    pub async fn start(&self) {
        info!(
            workers = self.config.worker_count,
            buffer = self.config.queue_buffer_size,
            "scheduler starting"
        );

        self.processor
            .run(self.config.worker_count, self.shutdown_tx.subscribe())
            .await;

        info!("scheduler shut down gracefully");
    }

    /// Stop the scheduler. Idempotent; jobs already running finish first.
    pub fn close(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("scheduler close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
