use axum::{
    extract::{Path, State},
    Json,
};

use super::AppState;
use crate::db;
use crate::error::{ok, AppError, AppResponse, AppResult};
use crate::model::{DiningTable, NewTable, TableChanges};

fn validate_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::validation("table name must be non-empty"));
    }
    Ok(())
}

fn validate_seats(seats: i64) -> AppResult<()> {
    if seats < 0 {
        return Err(AppError::validation("seats must be >= 0"));
    }
    Ok(())
}

/// GET /api/tables
pub async fn list(State(state): State<AppState>) -> AppResult<Json<AppResponse<Vec<DiningTable>>>> {
    let tables = db::list_tables(&state.pool).await.map_err(AppError::database)?;
    Ok(ok(tables))
}

/// GET /api/tables/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<AppResponse<DiningTable>>> {
    let table = db::find_table(&state.pool, id)
        .await
        .map_err(AppError::database)?
        .ok_or_else(|| AppError::not_found(format!("Table {} not found", id)))?;
    Ok(ok(table))
}

/// POST /api/tables. The requested status is ignored; new tables are READY.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<NewTable>,
) -> AppResult<Json<AppResponse<DiningTable>>> {
    validate_name(&payload.name)?;
    validate_seats(payload.seats)?;
    let table = db::create_table(&state.pool, &payload)
        .await
        .map_err(AppError::database)?;
    tracing::info!(table_id = table.id, name = %table.name, "table created");
    Ok(ok(table))
}

/// PUT /api/tables/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<TableChanges>,
) -> AppResult<Json<AppResponse<DiningTable>>> {
    if let Some(name) = payload.name.as_deref() {
        validate_name(name)?;
    }
    if let Some(seats) = payload.seats {
        validate_seats(seats)?;
    }
    let table = db::update_table(&state.pool, id, &payload)
        .await
        .map_err(AppError::database)?
        .ok_or_else(|| AppError::not_found(format!("Table {} not found", id)))?;
    Ok(ok(table))
}

/// DELETE /api/tables/{id} (soft delete)
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<AppResponse<bool>>> {
    let deleted = db::delete_table(&state.pool, id)
        .await
        .map_err(AppError::database)?;
    if !deleted {
        return Err(AppError::not_found(format!("Table {} not found", id)));
    }
    Ok(ok(true))
}
