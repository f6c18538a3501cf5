//! Database module: connection setup, entity views and SQL repositories.
//!
//! - `model`: view models returned by the attendance queries.
//! - `repo`: users, tables and bookings, including the status projection.
//! - `attendance`: scanner records and timekeeping rows.
//! - `lease`: named job leases used as a cross-process run guard.
//!
//! Callers import from `resto_backoffice::db`; the submodules are re-exported.

pub mod attendance;
pub mod lease;
pub mod model;
pub mod repo;

pub use attendance::*;
pub use lease::*;
pub use model::{AttendanceBatch, DayInterval, NewScan, StoredBatch, StoredScans, UpsertKind};
pub use repo::*;
