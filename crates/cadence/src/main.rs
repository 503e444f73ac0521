//! Cadence: in-process job scheduler
//!
//! Main binary with subcommands:
//! - `run`: Start the scheduler with the sample jobs
//! - `jobs`: List job metadata persisted in a SQLite database

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod jobs;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "In-process job scheduler", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines instead of human-readable text
    #[arg(
        long,
        global = true,
        env = "CADENCE_LOG_JSON",
        action = clap::ArgAction::Set,
        value_parser = parse_bool_env,
        default_value = "false"
    )]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler with the sample jobs until Ctrl-C
    Run {
        /// Number of concurrent workers
        #[arg(long, env = "CADENCE_WORKERS", default_value_t = cadence_scheduler::DEFAULT_WORKER_COUNT)]
        workers: usize,

        /// Capacity of the delayed-add buffer
        #[arg(long, env = "CADENCE_QUEUE_BUFFER", default_value_t = cadence_scheduler::DEFAULT_QUEUE_BUFFER_SIZE)]
        queue_buffer: usize,

        /// SQLite database for job metadata (in-memory when omitted)
        #[arg(long, env = "CADENCE_DB")]
        db: Option<PathBuf>,

        /// Interval of the recurring sample job in seconds
        #[arg(long, default_value = "10")]
        interval: u64,

        /// Stop on its own after this many seconds
        #[arg(long)]
        run_for: Option<u64>,
    },

    /// List job metadata stored in a SQLite database
    Jobs {
        /// SQLite database to read
        #[arg(long, env = "CADENCE_DB")]
        db: PathBuf,

        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "cadence=info,cadence_scheduler=info".to_string()),
    );
    let (text, json) = if cli.log_json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();

    match cli.command {
        Commands::Run {
            workers,
            queue_buffer,
            db,
            interval,
            run_for,
        } => {
            daemon::run(daemon::RunConfig {
                worker_count: workers,
                queue_buffer,
                db,
                interval: Duration::from_secs(interval),
                run_for: run_for.map(Duration::from_secs),
            })
            .await
        }

        Commands::Jobs { db, json } => jobs::list(&db, json).await,
    }
}
