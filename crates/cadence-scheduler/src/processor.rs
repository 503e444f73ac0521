//! Worker pool draining the delaying queue.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::delaying::DelayingQueue;
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::store::JobStore;
use crate::types::{ActionError, Job};

/// Executes queued jobs on a fixed number of Tokio workers.
///
/// Cloning is cheap and every clone drives the same queue and store.
#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn JobStore>,
    queue: Arc<DelayingQueue<Job>>,
    retry: Arc<dyn RetryPolicy>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<DelayingQueue<Job>>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            store,
            queue,
            retry,
        }
    }

    pub fn queue(&self) -> &Arc<DelayingQueue<Job>> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run `workers` workers until `stop_rx` flips to `true` (or its sender
    /// is dropped), then shut the queue down and wait for the workers to
    /// drain it and finish their current job.
    pub async fn run(&self, workers: usize, mut stop_rx: watch::Receiver<bool>) {
        let workers = if workers == 0 {
            warn!("worker count of 0 requested, running 1 worker");
            1
        } else {
            workers
        };

        info!(workers, "processor starting");

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let processor = self.clone();
            tasks.spawn(async move { processor.worker(id).await });
        }

        // A dropped sender means nobody can ever stop us; treat it as a stop.
        let _ = stop_rx.wait_for(|stopped| *stopped).await;

        info!("processor stopping");
        self.queue.shutdown();

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }

        info!("processor stopped");
    }

    async fn worker(&self, id: usize) {
        debug!(worker = id, "worker started");
        while self.process().await {}
        debug!(worker = id, "worker exited");
    }

    /// Take one job from the queue and run a full cycle of it.
    ///
    /// Returns `false` once the queue has shut down and drained.
    pub async fn process(&self) -> bool {
        let Some(job) = self.queue.get().await else {
            return false;
        };

        self.execute_job(job).await;
        true
    }

    /// Execute a single job.
    ///
    /// Handles retries, rescheduling of recurring jobs and the metadata
    /// update. Failures are logged and never escape the worker.
    #[tracing::instrument(skip_all, fields(job_id = %job.id, name = %job.name))]
    async fn execute_job(&self, mut job: Job) {
        debug!("executing job");

        match job.action.clone() {
            Some(action) => {
                let attempts = job.attempts();
                let result = execute_with_retry(attempts, self.retry.as_ref(), || {
                    let invocation = action.invoke();
                    // Separate task, so a panicking action fails the attempt
                    // instead of killing this worker.
                    async move {
                        match tokio::spawn(invocation).await {
                            Ok(result) => result,
                            Err(e) => Err(Box::new(e) as ActionError),
                        }
                    }
                })
                .await;

                match result {
                    Ok(()) => debug!("job succeeded"),
                    Err(e) => error!(attempts, error = %e, "job failed after all attempts"),
                }
            }
            None => warn!("job has no action attached, skipping execution"),
        }

        job.last_finished_at = Some(Utc::now());

        // Written before the job can be picked up again.
        if let Err(e) = self.store.update_job(job.id, &job).await {
            error!(error = %e, "failed to update job metadata");
        }

        if job.is_recurring() && !self.is_removed(&job).await {
            debug!(interval_ms = job.interval.as_millis() as u64, "rescheduling recurring job");
            let interval = job.interval;
            self.queue.add_after(job, interval).await;
        }
    }

    /// Whether the stored copy of `job` has been logically deleted.
    async fn is_removed(&self, job: &Job) -> bool {
        match self.store.get_job(job.id).await {
            Ok(Some(stored)) if stored.is_deleted() => {
                info!("job was removed, not rescheduling");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "could not check job state, rescheduling anyway");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::{Instant, timeout};

    use crate::retry::ImmediateRetry;
    use crate::store::{MemoryJobStore, StoreError};
    use crate::types::JobId;

    fn processor_with(store: Arc<dyn JobStore>) -> Processor {
        Processor::new(
            store,
            Arc::new(DelayingQueue::new(10)),
            Arc::new(ImmediateRetry),
        )
    }

    fn counting_job(name: &str, calls: &Arc<AtomicU32>, fail: bool) -> Job {
        let calls = Arc::clone(calls);
        Job::new(name).with_action(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail { Err("mock job failed".into()) } else { Ok(()) }
            }
        })
    }

    async fn explode() -> Result<(), ActionError> {
        panic!("action blew up")
    }

    /// Store whose writes after creation always fail.
    struct BrokenStore;

    #[async_trait]
    impl JobStore for BrokenStore {
        async fn create_job(&self, job: Job) -> crate::store::Result<Job> {
            Ok(job)
        }
        async fn update_job(&self, id: JobId, _job: &Job) -> crate::store::Result<()> {
            Err(StoreError::JobNotFound { id })
        }
        async fn remove_job(&self, id: JobId) -> crate::store::Result<()> {
            Err(StoreError::JobNotFound { id })
        }
        async fn get_job(&self, _id: JobId) -> crate::store::Result<Option<Job>> {
            Ok(None)
        }
        async fn list_jobs(&self) -> crate::store::Result<Vec<Job>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_process_stops_after_shutdown() {
        let processor = processor_with(Arc::new(MemoryJobStore::new()));
        processor.queue().shutdown();

        assert!(!processor.process().await);
    }

    #[tokio::test]
    async fn test_failing_job_uses_retry_budget() {
        let store = Arc::new(MemoryJobStore::new());
        let processor = processor_with(store.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let job = store
            .create_job(counting_job("flaky", &calls, true).with_retry(3))
            .await
            .unwrap();
        processor.queue().add(job.clone());

        assert!(processor.process().await);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert!(stored.last_finished_at.is_some());
        // Run-once jobs are retired.
        assert!(processor.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_job_is_requeued_after_interval() {
        let store = Arc::new(MemoryJobStore::new());
        let processor = processor_with(store.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let job = store
            .create_job(
                counting_job("tick", &calls, false)
                    .with_run_once(false)
                    .with_interval(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        processor.queue().add(job);

        let start = Instant::now();
        assert!(processor.process().await);
        assert!(processor.process().await);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_removed_recurring_job_is_not_requeued() {
        let store = Arc::new(MemoryJobStore::new());
        let processor = processor_with(store.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let job = store
            .create_job(
                counting_job("tick", &calls, false)
                    .with_run_once(false)
                    .with_interval(Duration::from_millis(5)),
            )
            .await
            .unwrap();
        store.remove_job(job.id).await.unwrap();
        processor.queue().add(job.clone());

        assert!(processor.process().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(processor.queue().is_empty());

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert!(stored.is_deleted());
        assert!(stored.last_finished_at.is_some());
    }

    /// Store that notes how many jobs were ready in the queue at each update.
    struct QueueObservingStore {
        queue: Arc<DelayingQueue<Job>>,
        ready_at_update: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl JobStore for QueueObservingStore {
        async fn create_job(&self, job: Job) -> crate::store::Result<Job> {
            Ok(job)
        }
        async fn update_job(&self, _id: JobId, _job: &Job) -> crate::store::Result<()> {
            self.ready_at_update.lock().unwrap().push(self.queue.len());
            Ok(())
        }
        async fn remove_job(&self, id: JobId) -> crate::store::Result<()> {
            Err(StoreError::JobNotFound { id })
        }
        async fn get_job(&self, _id: JobId) -> crate::store::Result<Option<Job>> {
            Ok(None)
        }
        async fn list_jobs(&self) -> crate::store::Result<Vec<Job>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_metadata_is_persisted_before_requeue() {
        let queue = Arc::new(DelayingQueue::new(10));
        let store = Arc::new(QueueObservingStore {
            queue: Arc::clone(&queue),
            ready_at_update: std::sync::Mutex::new(Vec::new()),
        });
        let processor = Processor::new(store.clone(), queue, Arc::new(ImmediateRetry));
        let calls = Arc::new(AtomicU32::new(0));

        let mut job = counting_job("tick", &calls, false)
            .with_run_once(false)
            .with_interval(Duration::ZERO);
        job.id = JobId(1);
        processor.queue().add(job);

        assert!(processor.process().await);

        assert_eq!(*store.ready_at_update.lock().unwrap(), vec![0]);
        assert_eq!(processor.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_absorbed() {
        let processor = processor_with(Arc::new(BrokenStore));
        let calls = Arc::new(AtomicU32::new(0));

        processor.queue().add(counting_job("a", &calls, false));
        processor.queue().add(counting_job("b", &calls, false));

        assert!(processor.process().await);
        assert!(processor.process().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_action_does_not_kill_worker() {
        let processor = processor_with(Arc::new(MemoryJobStore::new()));
        let calls = Arc::new(AtomicU32::new(0));

        processor
            .queue()
            .add(Job::new("panics").with_retry(1).with_action(explode));
        processor.queue().add(counting_job("after", &calls, false));

        assert!(processor.process().await);
        assert!(processor.process().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_without_action_is_skipped() {
        let store = Arc::new(MemoryJobStore::new());
        let processor = processor_with(store.clone());

        let job = store.create_job(Job::new("inert")).await.unwrap();
        processor.queue().add(job.clone());

        assert!(processor.process().await);
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert!(stored.last_finished_at.is_some());
    }

    #[tokio::test]
    async fn test_run_returns_after_stop() {
        let processor = processor_with(Arc::new(MemoryJobStore::new()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let running = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(3, stop_rx).await })
        };

        tokio::task::yield_now().await;
        stop_tx.send_replace(true);

        timeout(Duration::from_secs(1), running)
            .await
            .expect("run should return after stop")
            .unwrap();
        assert!(processor.queue().shutting_down());
    }
}
