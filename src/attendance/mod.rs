//! Fingerprint scanner ingestion: export parsing and daily attendance folding.

pub mod parser;
pub mod reconciler;

pub use parser::{parse_line, parse_scan_log, RawScanEvent, ScanLog};
pub use reconciler::{
    dedup_delta, fold_interval, reconcile_attendance, user_email, AttendanceSettings,
    IngestReport,
};
