//! Scheduler types.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::WorkItem;

/// Error returned by a job action.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// Future produced by one invocation of a job action.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send>>;

/// Identity assigned to a job by the [`JobStore`](crate::JobStore).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Whether a store has assigned this id.
    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical delete flag. Records are never physically removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeleteState {
    /// Never written by a store.
    #[default]
    Unknown = 0,
    /// Logically deleted.
    Deleted = 1,
    /// Live record.
    Active = 2,
}

impl DeleteState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<u8> for DeleteState {
    fn from(value: u8) -> Self {
        match value {
            1 => DeleteState::Deleted,
            2 => DeleteState::Active,
            _ => DeleteState::Unknown,
        }
    }
}

/// The user-defined logic of a job.
///
/// Cheap to clone; every clone invokes the same closure.
#[derive(Clone)]
pub struct JobAction(Arc<dyn Fn() -> ActionFuture + Send + Sync>);

impl JobAction {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    /// Start one invocation of the action.
    pub fn invoke(&self) -> ActionFuture {
        (self.0)()
    }
}

impl fmt::Debug for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JobAction(..)")
    }
}

/// A schedulable unit of work and its persisted metadata.
///
/// The action is never serialized, so a job loaded back from a store is
/// inert until the embedding application attaches an action again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned identity (0 until first persisted).
    pub id: JobId,
    /// Human-readable name for the job.
    pub name: String,
    /// Extra attempts after a failed execution.
    pub retry_times: u32,
    /// Run a single cycle and retire.
    pub run_once: bool,
    /// Delay between cycles of a recurring job.
    pub interval: Duration,
    /// What to execute.
    #[serde(skip)]
    pub action: Option<JobAction>,
    /// When this job was first persisted.
    pub created_at: DateTime<Utc>,
    /// When this job's metadata was last written.
    pub updated_at: DateTime<Utc>,
    /// When the last execution cycle finished, successful or not.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Soft-delete flag.
    pub deleted: DeleteState,
}

impl Job {
    /// Create a run-once job with no retries and no action.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::default(),
            name: name.into(),
            retry_times: 0,
            run_once: true,
            interval: Duration::ZERO,
            action: None,
            created_at: now,
            updated_at: now,
            last_finished_at: None,
            deleted: DeleteState::Unknown,
        }
    }

    /// Attach the logic to run.
    pub fn with_action<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        self.action = Some(JobAction::new(f));
        self
    }

    /// Whether to run only a single cycle.
    pub fn with_run_once(mut self, once: bool) -> Self {
        self.run_once = once;
        self
    }

    /// Delay between cycles; only used when the job is recurring.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Number of retries after a failed attempt.
    pub fn with_retry(mut self, times: u32) -> Self {
        self.retry_times = times;
        self
    }

    pub fn is_recurring(&self) -> bool {
        !self.run_once
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted == DeleteState::Deleted
    }

    /// Total attempts per execution cycle.
    pub fn attempts(&self) -> u32 {
        self.retry_times.saturating_add(1)
    }
}

impl WorkItem for Job {
    type Key = JobId;

    fn key(&self) -> JobId {
        self.id
    }
}
