//! HTTP API.

mod bookings;
mod tables;
mod timekeeping;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::db::Pool;
use crate::ingest::JobSettings;

/// Upper bound for uploaded scanner exports.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub job: Arc<JobSettings>,
}

impl AppState {
    pub fn new(pool: Pool, job: JobSettings) -> Self {
        Self {
            pool,
            job: Arc::new(job),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tables", get(tables::list).post(tables::create))
        .route(
            "/api/tables/{id}",
            get(tables::get_by_id)
                .put(tables::update)
                .delete(tables::delete),
        )
        .route("/api/bookings", get(bookings::list).post(bookings::create))
        .route(
            "/api/bookings/{id}",
            get(bookings::get_by_id)
                .put(bookings::update)
                .delete(bookings::delete),
        )
        .route("/api/timekeeping", get(timekeeping::list))
        .route(
            "/api/timekeeping/upload",
            post(timekeeping::upload)
                .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
