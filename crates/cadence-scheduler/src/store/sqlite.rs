//! SQLite-backed job store.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::{JobStore, Result, StoreError};
use crate::types::{DeleteState, Job, JobId};

const SELECT_JOB: &str = "SELECT id, name, retry_times, run_once, interval_ns,
        created_at, updated_at, last_finished_at, is_delete
 FROM scheduler_job";

/// Initialise the `scheduler_job` table in `conn`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduler_job (
            id                INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            name              TEXT    NOT NULL,
            retry_times       INTEGER NOT NULL DEFAULT 0,
            run_once          INTEGER NOT NULL DEFAULT 1,
            interval_ns       INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT    NOT NULL,   -- RFC 3339
            updated_at        TEXT    NOT NULL,   -- RFC 3339
            last_finished_at  TEXT,               -- RFC 3339 or NULL
            is_delete         INTEGER NOT NULL DEFAULT 0  -- 0 unknown, 1 deleted, 2 active
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Persists job metadata to a SQLite database.
///
/// Queries run on Tokio's blocking pool behind a single shared connection.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = Self::new(Connection::open(path)?)?;
        info!(path = %path.display(), "opened sqlite job store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }
}

/// Column values of one `scheduler_job` row.
struct JobRow {
    id: i64,
    name: String,
    retry_times: u32,
    run_once: bool,
    interval_ns: i64,
    created_at: String,
    updated_at: String,
    last_finished_at: Option<String>,
    is_delete: u8,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            retry_times: row.get(2)?,
            run_once: row.get(3)?,
            interval_ns: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            last_finished_at: row.get(7)?,
            is_delete: row.get(8)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let id = u64::try_from(self.id)
            .map_err(|_| StoreError::InvalidRecord(format!("negative id {}", self.id)))?;
        let interval_ns = u64::try_from(self.interval_ns).map_err(|_| {
            StoreError::InvalidRecord(format!("negative interval for job {id}"))
        })?;

        Ok(Job {
            id: JobId(id),
            name: self.name,
            retry_times: self.retry_times,
            run_once: self.run_once,
            interval: Duration::from_nanos(interval_ns),
            action: None,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            last_finished_at: self
                .last_finished_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            deleted: DeleteState::from(self.is_delete),
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRecord(format!("bad timestamp {value:?}: {e}")))
}

fn interval_ns(interval: Duration) -> i64 {
    i64::try_from(interval.as_nanos()).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, mut job: Job) -> Result<Job> {
        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;
        if job.deleted == DeleteState::Unknown {
            job.deleted = DeleteState::Active;
        }

        let explicit_id = job.id.is_assigned().then_some(job.id.0 as i64);
        let name = job.name.clone();
        let retry_times = job.retry_times;
        let run_once = job.run_once;
        let interval = interval_ns(job.interval);
        let stamp = now.to_rfc3339();
        let last_finished_at = job.last_finished_at.map(|dt| dt.to_rfc3339());
        let deleted = job.deleted.as_u8();

        let id = self
            .with_conn(move |conn| {
                if let Some(id) = explicit_id {
                    let exists = conn
                        .query_row("SELECT 1 FROM scheduler_job WHERE id = ?1", [id], |_| Ok(()))
                        .optional()?
                        .is_some();
                    if exists {
                        return Err(StoreError::JobExists { id: JobId(id as u64) });
                    }
                }

                conn.execute(
                    "INSERT INTO scheduler_job
                     (id, name, retry_times, run_once, interval_ns,
                      created_at, updated_at, last_finished_at, is_delete)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)",
                    params![
                        explicit_id,
                        name,
                        retry_times,
                        run_once,
                        interval,
                        stamp,
                        last_finished_at,
                        deleted
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        job.id = JobId(id as u64);
        debug!(job_id = %job.id, name = %job.name, "job row inserted");
        Ok(job)
    }

    async fn update_job(&self, id: JobId, job: &Job) -> Result<()> {
        let name = job.name.clone();
        let retry_times = job.retry_times;
        let run_once = job.run_once;
        let interval = interval_ns(job.interval);
        let last_finished_at = job.last_finished_at.map(|dt| dt.to_rfc3339());
        let stamp = Utc::now().to_rfc3339();

        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE scheduler_job
                 SET name = ?1, retry_times = ?2, run_once = ?3, interval_ns = ?4,
                     last_finished_at = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    name,
                    retry_times,
                    run_once,
                    interval,
                    last_finished_at,
                    stamp,
                    id.0 as i64
                ],
            )?;
            if n == 0 {
                return Err(StoreError::JobNotFound { id });
            }
            Ok(())
        })
        .await
    }

    async fn remove_job(&self, id: JobId) -> Result<()> {
        let stamp = Utc::now().to_rfc3339();

        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE scheduler_job SET is_delete = ?1, updated_at = ?2 WHERE id = ?3",
                params![DeleteState::Deleted.as_u8(), stamp, id.0 as i64],
            )?;
            if n == 0 {
                return Err(StoreError::JobNotFound { id });
            }
            info!(job_id = %id, "job marked deleted");
            Ok(())
        })
        .await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("{SELECT_JOB} WHERE id = ?1"),
                    [id.0 as i64],
                    JobRow::from_row,
                )
                .optional()?;
            row.map(JobRow::into_job).transpose()
        })
        .await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_JOB} ORDER BY id"))?;
            let rows = stmt
                .query_map([], JobRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(JobRow::into_job).collect()
        })
        .await
    }
}
