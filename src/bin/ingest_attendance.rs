use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use resto_backoffice::capture::is_scanner_export;
use resto_backoffice::config;
use resto_backoffice::db;
use resto_backoffice::ingest::{run_attendance_job, IngestOutcome, JobSettings};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest one fingerprint scanner export into the attendance tables and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Scanner export (.dat) to ingest
    #[arg(long)]
    file: PathBuf,

    /// Day the timekeeping rows are written for (defaults to today)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let name = args.file.to_string_lossy();
    if !is_scanner_export(&name) {
        anyhow::bail!("{} is not a .dat scanner export", name);
    }

    let data_dir = cfg.app.resolved_data_dir();
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/backoffice.db", data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let raw = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let raw = String::from_utf8_lossy(&raw);
    let target_date = args.date.unwrap_or_else(|| Local::now().date_naive());

    let job = JobSettings::from_config(&cfg);
    match run_attendance_job(&pool, &job, &raw, target_date).await? {
        IngestOutcome::Completed(report) => {
            info!(
                inserted = report.inserted_records,
                created = report.timekeeping_created,
                updated = report.timekeeping_updated,
                unresolved = ?report.unresolved_names,
                "Attendance ingest completed"
            );
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        IngestOutcome::Skipped => {
            warn!("Another attendance ingest holds the lease; nothing written");
        }
    }
    Ok(())
}
