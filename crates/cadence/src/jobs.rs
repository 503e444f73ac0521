//! Jobs command: prints the job metadata recorded in a SQLite database.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use miette::Result;

use cadence_scheduler::{DeleteState, Job, JobStore, SqliteJobStore};

pub async fn list(db: &Path, json: bool) -> Result<()> {
    if !db.exists() {
        return Err(miette::miette!("job database not found: {}", db.display()));
    }

    let store = SqliteJobStore::open(db)
        .map_err(|e| miette::miette!("failed to open job database: {}", e))?;
    let jobs = store
        .list_jobs()
        .await
        .map_err(|e| miette::miette!("failed to list jobs: {}", e))?;

    let output = if json {
        serde_json::to_string_pretty(&jobs)
            .map_err(|e| miette::miette!("failed to encode jobs: {}", e))?
    } else {
        render_table(&jobs)
    };
    println!("{}", output);

    Ok(())
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

fn state(deleted: DeleteState) -> &'static str {
    match deleted {
        DeleteState::Unknown => "unknown",
        DeleteState::Deleted => "deleted",
        DeleteState::Active => "active",
    }
}

fn render_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "no jobs recorded".to_string();
    }

    let mut out = format!(
        "{:>6}  {:<20}  {:<9}  {:>10}  {:>5}  {:<20}  {}",
        "ID", "NAME", "KIND", "INTERVAL", "RETRY", "LAST FINISHED", "STATE"
    );
    for job in jobs {
        let kind = if job.run_once { "once" } else { "recurring" };
        let interval = if job.run_once {
            "-".to_string()
        } else {
            format!("{}s", job.interval.as_secs_f64())
        };
        let _ = write!(
            out,
            "\n{:>6}  {:<20}  {:<9}  {:>10}  {:>5}  {:<20}  {}",
            job.id,
            job.name,
            kind,
            interval,
            job.retry_times,
            timestamp(job.last_finished_at),
            state(job.deleted),
        );
    }
    out
}
