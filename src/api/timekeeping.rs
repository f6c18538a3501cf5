use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;

use super::AppState;
use crate::capture::{is_scanner_export, EXPORT_EXTENSION};
use crate::db;
use crate::error::{ok, AppError, AppResponse, AppResult};
use crate::ingest::{run_attendance_job, IngestOutcome};
use crate::model::Timekeeping;

#[derive(Debug, Deserialize)]
pub struct DayParams {
    pub date: Option<NaiveDate>,
}

impl DayParams {
    fn day(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// GET /api/timekeeping?date=YYYY-MM-DD
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<DayParams>,
) -> AppResult<Json<AppResponse<Vec<Timekeeping>>>> {
    let rows = db::list_timekeeping(&state.pool, params.day())
        .await
        .map_err(AppError::database)?;
    Ok(ok(rows))
}

/// POST /api/timekeeping/upload?date=YYYY-MM-DD (multipart field `file`)
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<DayParams>,
    mut multipart: Multipart,
) -> AppResult<Json<AppResponse<IngestOutcome>>> {
    let mut content: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::validation("No filename provided in file field"))?;
        if !is_scanner_export(&filename) {
            return Err(AppError::UnsupportedFormat(format!(
                "'{}' is not a .{} scanner export",
                filename, EXPORT_EXTENSION
            )));
        }
        let bytes = field.bytes().await?;
        content = Some((filename, bytes.to_vec()));
        break;
    }

    let (filename, bytes) = content.ok_or_else(|| {
        AppError::validation("No 'file' field found. Field name must be 'file'")
    })?;
    if bytes.is_empty() {
        return Err(AppError::validation("Empty file provided"));
    }

    let raw = String::from_utf8_lossy(&bytes);
    let outcome = run_attendance_job(&state.pool, &state.job, &raw, params.day())
        .await
        .map_err(AppError::database)?;
    if outcome == IngestOutcome::Skipped {
        return Err(AppError::Conflict(
            "attendance ingest already running".to_string(),
        ));
    }
    tracing::info!(%filename, size = bytes.len(), "scanner export uploaded");
    Ok(ok(outcome))
}
