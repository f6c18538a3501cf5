use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use resto_backoffice::api::{self, AppState};
use resto_backoffice::capture::{CaptureDir, ExportFetcher, HttpExportFetcher};
use resto_backoffice::config;
use resto_backoffice::db;
use resto_backoffice::ingest::{self, JobSettings};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Serve the API without the scheduled attendance ingest.
    #[arg(long)]
    no_scheduler: bool,
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

    let data_dir = cfg.app.resolved_data_dir();
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/backoffice.db", data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let job = JobSettings::from_config(&cfg);

    if args.no_scheduler {
        warn!("scheduled attendance ingest disabled");
    } else {
        let fetcher: Option<Box<dyn ExportFetcher>> = match cfg.attendance.export_url.clone() {
            Some(url) => Some(Box::new(HttpExportFetcher::new(url)?) as Box<dyn ExportFetcher>),
            None => None,
        };
        let interval = Duration::from_secs(cfg.attendance.interval_seconds);
        tokio::spawn(ingest::scheduler_loop(
            pool.clone(),
            job.clone(),
            CaptureDir::from_config(&cfg),
            fetcher,
            interval,
        ));
    }

    let app = api::router(AppState::new(pool, job));
    let listener = tokio::net::TcpListener::bind(&cfg.app.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.listen))?;
    info!(listen = %cfg.app.listen, database_url = %database_url, "starting back office api");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
