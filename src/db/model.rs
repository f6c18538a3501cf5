//! View models returned by the attendance repository.
//!
//! Keep these structs focused on the data returned by queries. Reconciliation
//! logic lives in `crate::attendance`.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};

/// Scan timestamps already persisted for one day, keyed by scanner display name.
#[derive(Debug, Clone, Default)]
pub struct StoredScans {
    pub by_name: HashMap<String, HashSet<NaiveDateTime>>,
}

impl StoredScans {
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn contains(&self, name: &str, at: &NaiveDateTime) -> bool {
        self.by_name
            .get(name)
            .map(|set| set.contains(at))
            .unwrap_or(false)
    }
}

/// Whether a timekeeping upsert inserted a new row or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Created,
    Updated,
}

/// One scan to append to the scanner log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScan {
    pub display_name: String,
    pub scanned_at: NaiveDateTime,
    pub device_id: Option<String>,
}

/// Everything written for one account (or one unmatched display name) in a
/// single transaction: the new scans and, for accounts, the folded interval.
#[derive(Debug, Clone)]
pub struct AttendanceBatch {
    pub user_id: Option<i64>,
    pub scans: Vec<NewScan>,
    pub interval: Option<DayInterval>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayInterval {
    pub day: NaiveDate,
    pub check_in: NaiveDateTime,
    pub check_out: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredBatch {
    pub inserted: u64,
    pub upsert: Option<UpsertKind>,
}
