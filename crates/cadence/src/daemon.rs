//! Run command: drives the scheduler with a fixed set of sample jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tracing::{info, warn};

use cadence_scheduler::{
    ActionError, Job, JobStore, MemoryJobStore, Scheduler, SchedulerConfig, SqliteJobStore,
};

/// Configuration for the run command.
pub struct RunConfig {
    pub worker_count: usize,
    pub queue_buffer: usize,
    /// SQLite database for job metadata. In-memory when `None`.
    pub db: Option<PathBuf>,
    /// Interval of the recurring sample job.
    pub interval: Duration,
    /// Stop after this long instead of waiting for Ctrl-C.
    pub run_for: Option<Duration>,
}

async fn task1() -> Result<(), ActionError> {
    info!(task = "task1", "task running");
    Ok(())
}

async fn task2() -> Result<(), ActionError> {
    info!(task = "task2", "task running");
    Ok(())
}

async fn task3() -> Result<(), ActionError> {
    info!(task = "task3", "task running");
    Err("mock job failed".into())
}

/// The demo workload: one recurring job, one run-once job, and one job that
/// always fails with a retry budget of 3.
pub fn sample_jobs(interval: Duration) -> Vec<Job> {
    vec![
        Job::new("task1")
            .with_action(task1)
            .with_run_once(false)
            .with_interval(interval),
        Job::new("task2").with_action(task2).with_run_once(true),
        Job::new("task3")
            .with_action(task3)
            .with_run_once(true)
            .with_retry(3),
    ]
}

fn open_store(db: Option<&PathBuf>) -> Result<Arc<dyn JobStore>> {
    match db {
        Some(path) => {
            let store = SqliteJobStore::open(path)
                .map_err(|e| miette::miette!("failed to open job database: {}", e))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryJobStore::new())),
    }
}

/// Resolves on Ctrl-C or once `run_for` has elapsed.
async fn shutdown_signal(run_for: Option<Duration>) {
    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl-C");
                deadline.await;
                info!("run duration elapsed");
            }
        },
        () = &mut deadline => info!("run duration elapsed"),
    }
}

/// Schedule the sample jobs and run until shutdown.
pub async fn run(config: RunConfig) -> Result<()> {
    let store = open_store(config.db.as_ref())?;
    let scheduler = Arc::new(Scheduler::new(
        SchedulerConfig::default()
            .with_worker_count(config.worker_count)
            .with_queue_buffer(config.queue_buffer),
        store,
    ));

    for job in sample_jobs(config.interval) {
        scheduler
            .schedule_job(job)
            .await
            .map_err(|e| miette::miette!("failed to schedule job: {}", e))?;
    }

    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.start().await })
    };

    shutdown_signal(config.run_for).await;

    info!("shutting down scheduler");
    scheduler.close();
    scheduler_handle
        .await
        .map_err(|e| miette::miette!("scheduler task failed: {}", e))?;

    Ok(())
}
