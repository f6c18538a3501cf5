use crate::attendance::{reconcile_attendance, AttendanceSettings, IngestReport};
use crate::capture::{CaptureDir, ExportFetcher};
use crate::config::Config;
use crate::db::{self, Pool};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use std::time::{Duration, SystemTime};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Lease name guarding attendance ingestion across triggers and processes.
pub const ATTENDANCE_JOB: &str = "attendance-ingest";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Completed(IngestReport),
    /// Another run held the lease; nothing was written.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub attendance: AttendanceSettings,
    pub lease_ttl: chrono::Duration,
}

impl JobSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            attendance: AttendanceSettings {
                email_domain: cfg.attendance.email_domain.clone(),
            },
            lease_ttl: chrono::Duration::seconds(cfg.attendance.lease_seconds as i64),
        }
    }
}

/// Run attendance reconciliation under the job lease. A trigger arriving while
/// the lease is held is logged and dropped, not queued.
#[instrument(skip_all, fields(target_date = %target_date))]
pub async fn run_attendance_job(
    pool: &Pool,
    settings: &JobSettings,
    raw: &str,
    target_date: NaiveDate,
) -> Result<IngestOutcome> {
    let token = Uuid::new_v4().to_string();
    let acquired =
        db::try_acquire_lease(pool, ATTENDANCE_JOB, &token, Utc::now(), settings.lease_ttl)
            .await?;
    if !acquired {
        let holder = db::lease_holder(pool, ATTENDANCE_JOB).await?;
        warn!(?holder, "attendance ingest already running; dropping trigger");
        return Ok(IngestOutcome::Skipped);
    }

    let res = reconcile_attendance(pool, &settings.attendance, raw, target_date).await;

    match db::release_lease(pool, ATTENDANCE_JOB, &token).await {
        Ok(true) => {}
        Ok(false) => warn!(%token, "attendance lease was taken over before release"),
        Err(err) => warn!(?err, "failed to release attendance lease"),
    }
    res.map(IngestOutcome::Completed)
}

/// One scheduled pass: fetch (when configured), promote the raw capture,
/// ingest it for `today` and sweep expired captures. Returns `None` when no
/// capture was waiting.
#[instrument(skip_all, fields(today = %today))]
pub async fn run_scheduled_cycle(
    pool: &Pool,
    settings: &JobSettings,
    capture: &CaptureDir,
    fetcher: Option<&dyn ExportFetcher>,
    today: NaiveDate,
) -> Result<Option<IngestOutcome>> {
    if let Some(fetcher) = fetcher {
        match fetcher.fetch().await {
            Ok(bytes) => {
                capture.store_raw(&bytes).await?;
            }
            Err(err) => warn!(?err, "scanner export download failed; using existing capture"),
        }
    }

    let outcome = match capture.promote(today).await? {
        Some(path) => {
            let raw = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let raw = String::from_utf8_lossy(&raw);
            Some(run_attendance_job(pool, settings, &raw, today).await?)
        }
        None => None,
    };

    capture.sweep(SystemTime::now()).await?;
    Ok(outcome)
}

/// Drive `run_scheduled_cycle` every `interval` until the task is dropped.
pub async fn scheduler_loop(
    pool: Pool,
    settings: JobSettings,
    capture: CaptureDir,
    fetcher: Option<Box<dyn ExportFetcher>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let today = Local::now().date_naive();
        match run_scheduled_cycle(&pool, &settings, &capture, fetcher.as_deref(), today).await {
            Ok(Some(IngestOutcome::Completed(report))) => {
                info!(inserted = report.inserted_records, "scheduled attendance ingest done")
            }
            Ok(Some(IngestOutcome::Skipped)) => {}
            Ok(None) => info!("no scanner capture waiting"),
            Err(err) => error!(?err, "scheduled attendance ingest failed"),
        }
    }
}
