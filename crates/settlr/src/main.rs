use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

use settlr::config::{apply_env_overrides, load_config};
use settlr::db::seed::seed_transactions;
use settlr::logging::{self, LogFormat};
use settlr::settlement::export::download_url;
use settlr::{
    Config, ConfigError, Database, DateRange, Job, JobCoordinator, JobError, JobStore,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "settlr", version, about = "Per-merchant daily settlement jobs")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true, env = "SETTLR_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path; overrides the configured one.
    #[arg(long, global = true, env = "SETTLR_DB")]
    db: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert synthetic transactions.
    Seed {
        #[arg(long)]
        count: usize,
        #[arg(long, default_value = "2025-01-01")]
        from: String,
        #[arg(long, default_value = "2025-01-31")]
        to: String,
    },
    /// Run a settlement job for an inclusive date range and wait for it.
    Settle {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Print a stored job.
    Status { job_id: Uuid },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(None, cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> settlr::Result<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    let config = apply_env_overrides(config);

    let db_path = cli
        .db
        .clone()
        .or_else(|| config.database_path())
        .ok_or_else(|| ConfigError::Validation {
            message: "no database path configured; pass --db".to_string(),
        })?;
    let db = Database::open(&db_path)?;

    match cli.command {
        Command::Seed { count, from, to } => {
            let range = DateRange::parse(&from, &to)
                .ok_or(JobError::InvalidDateRange { from, to })?;
            let inserted = seed_transactions(&db, count, &range, &mut rand::thread_rng())?;
            println!("{}", inserted);
            Ok(())
        }
        Command::Settle { from, to } => settle(db, &config, &from, &to),
        Command::Status { job_id } => {
            let job = db.get_by_id(job_id)?.ok_or(JobError::JobNotFound(job_id))?;
            print_job(&job);
            Ok(())
        }
    }
}

fn settle(db: Database, config: &Config, from: &str, to: &str) -> settlr::Result<()> {
    let coordinator = Arc::new(JobCoordinator::with_database(db, config)?);
    let mut events = coordinator.subscribe();
    coordinator.start_worker_pool()?;

    let job = coordinator.create_settlement_job(from, to)?;
    info!("Submitted job {} ({} transactions)", job.id, job.total);

    let handler_coordinator = Arc::clone(&coordinator);
    let job_id = job.id;
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupt received, cancelling job {}", job_id);
        if let Err(e) = handler_coordinator.cancel_job(job_id) {
            warn!("Cancel failed: {}", e);
        }
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let finished = loop {
        loop {
            match events.try_recv() {
                Ok(event) if event.job_id == job_id => {
                    eprintln!(
                        "{} {:>3}% {}/{} {}",
                        event.status, event.progress, event.processed, event.total, event.message
                    );
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let current = coordinator.get_job(job_id)?;
        if current.is_finished() {
            break current;
        }
        thread::sleep(POLL_INTERVAL);
    };

    coordinator.shutdown();
    print_job(&finished);
    Ok(())
}

fn print_job(job: &Job) {
    let value = serde_json::json!({
        "job": job,
        "downloadUrl": download_url(job),
    });
    match serde_json::to_string_pretty(&value) {
        Ok(out) => println!("{}", out),
        Err(e) => error!("Failed to render job {}: {}", job.id, e),
    }
}
