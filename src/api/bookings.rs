use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::db;
use crate::error::{ok, AppError, AppResponse, AppResult};
use crate::model::{Booking, BookingChanges, NewBooking};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub table_id: Option<i64>,
}

/// GET /api/bookings?table_id=
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<AppResponse<Vec<Booking>>>> {
    let bookings = db::list_bookings(&state.pool, params.table_id)
        .await
        .map_err(AppError::database)?;
    Ok(ok(bookings))
}

/// GET /api/bookings/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<AppResponse<Booking>>> {
    let booking = db::find_booking(&state.pool, id)
        .await
        .map_err(AppError::database)?
        .ok_or_else(|| AppError::not_found(format!("Booking {} not found", id)))?;
    Ok(ok(booking))
}

/// POST /api/bookings. Books the table when it was READY.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<NewBooking>,
) -> AppResult<Json<AppResponse<Booking>>> {
    if payload.customer_name.trim().is_empty() {
        return Err(AppError::validation("customer_name must be non-empty"));
    }
    let booking = db::create_booking(&state.pool, &payload)
        .await
        .map_err(AppError::database)?
        .ok_or_else(|| AppError::not_found(format!("Table {} not found", payload.table_id)))?;
    Ok(ok(booking))
}

/// PUT /api/bookings/{id}. A status change re-derives the table status.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<BookingChanges>,
) -> AppResult<Json<AppResponse<Booking>>> {
    if let Some(name) = payload.customer_name.as_deref() {
        if name.trim().is_empty() {
            return Err(AppError::validation("customer_name must be non-empty"));
        }
    }
    let booking = db::update_booking(&state.pool, id, &payload)
        .await
        .map_err(AppError::database)?
        .ok_or_else(|| AppError::not_found(format!("Booking {} not found", id)))?;
    Ok(ok(booking))
}

/// DELETE /api/bookings/{id} (soft delete)
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<AppResponse<bool>>> {
    let deleted = db::delete_booking(&state.pool, id)
        .await
        .map_err(AppError::database)?;
    if !deleted {
        return Err(AppError::not_found(format!("Booking {} not found", id)));
    }
    Ok(ok(true))
}
