//! In-process job scheduler for Cadence.
//!
//! This crate provides a scheduling runtime that:
//! - Runs jobs once or on a fixed interval
//! - Retries failing jobs up to a per-job budget
//! - Drains work with a fixed-size pool of Tokio workers
//! - Records job metadata through a pluggable [`JobStore`]
//!
//! The heart of it is the [`DelayingQueue`]: a blocking FIFO plus a single
//! background task that owns a deduplicated delay heap and moves items into
//! the FIFO as they mature.

mod delaying;
mod error;
mod heap;
mod processor;
mod queue;
mod retry;
mod scheduler;
pub mod store;
mod types;

pub use delaying::DelayingQueue;
pub use error::SchedulerError;
pub use processor::Processor;
pub use queue::{BlockingQueue, WorkItem};
pub use retry::{ExponentialRetry, FixedRetry, ImmediateRetry, RetryPolicy, execute_with_retry};
pub use scheduler::{
    DEFAULT_QUEUE_BUFFER_SIZE, DEFAULT_WORKER_COUNT, Scheduler, SchedulerConfig,
};
pub use store::{JobStore, MemoryJobStore, NoopJobStore, SqliteJobStore, StoreError};
pub use types::{ActionError, DeleteState, Job, JobAction, JobId};
