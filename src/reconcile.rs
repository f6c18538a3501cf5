//! Table status projection.
//!
//! A table's stored status is derived from its bookings and recomputed every
//! time a booking changes status. Between two booking events the stored value
//! may be stale; nothing else writes it.

use crate::model::{BookingStatus, TableStatus};

/// Compute the table status after one of its bookings moved to `event`.
///
/// `other_waiting` tells whether any booking on the same table, other than the
/// one that just changed, is still WAITING. Returns `None` when the stored
/// status must be left untouched.
pub fn reconcile_table_status(
    current: TableStatus,
    event: BookingStatus,
    other_waiting: bool,
) -> Option<TableStatus> {
    match event {
        BookingStatus::Canceled if other_waiting => Some(TableStatus::Booked),
        BookingStatus::Canceled => Some(TableStatus::Ready),
        BookingStatus::Done => Some(TableStatus::Used),
        // Only a free table becomes booked; BOOKED and USED never regress here.
        BookingStatus::Waiting if current == TableStatus::Ready => Some(TableStatus::Booked),
        BookingStatus::Waiting => None,
    }
}

/// New tables always start READY whatever the caller asked for.
pub fn status_on_create(_requested: Option<TableStatus>) -> TableStatus {
    TableStatus::Ready
}

/// Guard for direct table edits: a table cannot be marked READY while a
/// WAITING booking still points at it.
pub fn guard_table_update(requested: TableStatus, has_waiting: bool) -> TableStatus {
    if requested == TableStatus::Ready && has_waiting {
        TableStatus::Booked
    } else {
        requested
    }
}
