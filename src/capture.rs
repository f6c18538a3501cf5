//! Scanner export files on disk.
//!
//! The raw capture lands under a fixed name, gets renamed to a per-day file
//! once it is ready for processing, and per-day files are swept after the
//! retention window.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;

pub const EXPORT_EXTENSION: &str = "dat";

/// True when `filename` carries the scanner export extension.
pub fn is_scanner_export(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(EXPORT_EXTENSION))
        .unwrap_or(false)
}

/// Source of raw scanner exports.
#[async_trait]
pub trait ExportFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>>;
}

/// Downloads the export from the scanner's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpExportFetcher {
    http: Client,
    url: String,
}

impl HttpExportFetcher {
    pub fn new(url: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent("resto-backoffice/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl ExportFetcher for HttpExportFetcher {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let res = self.http.get(&self.url).send().await?;
        if !res.status().is_success() {
            return Err(anyhow!("download error {} for {}", res.status(), self.url));
        }
        Ok(res.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct CaptureDir {
    dir: PathBuf,
    raw_file: String,
    retention: Duration,
}

impl CaptureDir {
    pub fn new(dir: impl Into<PathBuf>, raw_file: impl Into<String>, retention_days: u64) -> Self {
        Self {
            dir: dir.into(),
            raw_file: raw_file.into(),
            retention: Duration::from_secs(retention_days * 24 * 60 * 60),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.attendance.resolved_capture_dir(),
            cfg.attendance.raw_file.clone(),
            cfg.attendance.retention_days,
        )
    }

    pub fn raw_path(&self) -> PathBuf {
        self.dir.join(&self.raw_file)
    }

    fn stem(&self) -> &str {
        Path::new(&self.raw_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("attlog")
    }

    /// Per-day name, e.g. `attlog-2024-01-05.dat`.
    pub fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}-{}.{}", self.stem(), day.format("%Y-%m-%d"), EXPORT_EXTENSION))
    }

    /// Write a freshly downloaded export as the raw capture.
    pub async fn store_raw(&self, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create capture dir {}", self.dir.display()))?;
        let path = self.raw_path();
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Rename the raw capture to its per-day name. `None` when there is no raw
    /// capture waiting.
    pub async fn promote(&self, day: NaiveDate) -> Result<Option<PathBuf>> {
        let raw = self.raw_path();
        if !fs::try_exists(&raw).await.unwrap_or(false) {
            return Ok(None);
        }
        let target = self.day_path(day);
        fs::rename(&raw, &target)
            .await
            .with_context(|| format!("failed to rename {} to {}", raw.display(), target.display()))?;
        info!(from = %raw.display(), to = %target.display(), "capture ready for processing");
        Ok(Some(target))
    }

    /// Delete per-day captures last modified before `now - retention`.
    pub async fn sweep(&self, now: SystemTime) -> Result<usize> {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return Ok(0);
        };
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err).context("failed to list capture dir"),
        };

        let prefix = format!("{}-", self.stem());
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(&prefix) || !is_scanner_export(&name) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(?err, file = %name, "failed to remove old capture"),
            }
        }
        if removed > 0 {
            info!(removed, "swept old scanner captures");
        }
        Ok(removed)
    }
}
