use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableStatus {
    Ready,
    Booked,
    Used,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Ready => "READY",
            TableStatus::Booked => "BOOKED",
            TableStatus::Used => "USED",
        }
    }

    pub fn parse_state(value: &str) -> Option<Self> {
        match value {
            "READY" => Some(TableStatus::Ready),
            "BOOKED" => Some(TableStatus::Booked),
            "USED" => Some(TableStatus::Used),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Waiting,
    Canceled,
    Done,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Canceled => "CANCELED",
            BookingStatus::Done => "DONE",
        }
    }

    pub fn parse_state(value: &str) -> Option<Self> {
        match value {
            "WAITING" => Some(BookingStatus::Waiting),
            "CANCELED" => Some(BookingStatus::Canceled),
            "DONE" => Some(BookingStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
}

/// A physical restaurant table. `status` is a projection of its bookings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiningTable {
    pub id: i64,
    pub name: String,
    pub status: TableStatus,
    pub seats: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub table_id: i64,
    pub status: BookingStatus,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub arrival_at: Option<NaiveDateTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerScannerRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub display_name: String,
    pub scanned_at: NaiveDateTime,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timekeeping {
    pub id: i64,
    pub user_id: i64,
    pub day: NaiveDate,
    pub check_in: NaiveDateTime,
    pub check_out: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTable {
    pub name: String,
    #[serde(default)]
    pub seats: i64,
    /// Ignored on create; tables always start READY.
    #[serde(default)]
    pub status: Option<TableStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableChanges {
    pub name: Option<String>,
    pub seats: Option<i64>,
    pub status: Option<TableStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub table_id: i64,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub arrival_at: Option<NaiveDateTime>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingChanges {
    pub status: Option<BookingStatus>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub arrival_at: Option<NaiveDateTime>,
}
