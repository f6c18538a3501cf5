//! Fingerprint scanner export parser.
//!
//! Each line of a `.dat` export looks like
//! `<device id> <display name> <YYYY-MM-DD> <HH:MM:SS> [trailing fields...]`
//! with arbitrary runs of spaces or tabs between fields.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::warn;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// One fingerprint scan as read from the export. Lives only for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawScanEvent {
    pub device_id: String,
    pub display_name: String,
    pub at: NaiveDateTime,
}

/// Scans grouped by display name, each group sorted by time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanLog {
    pub by_name: BTreeMap<String, Vec<RawScanEvent>>,
    /// First timestamp in file order; its calendar day scopes deduplication.
    pub first_at: Option<NaiveDateTime>,
    pub skipped_lines: usize,
}

impl ScanLog {
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn dedup_day(&self) -> Option<NaiveDate> {
        self.first_at.map(|at| at.date())
    }

    pub fn event_count(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

/// Parse a single export line. Returns `None` for lines that do not carry a
/// device id, name, date and time.
pub fn parse_line(line: &str) -> Option<RawScanEvent> {
    let normalized = WHITESPACE.replace_all(line.trim(), " ");
    let fields: Vec<&str> = normalized.split(' ').collect();
    if fields.len() < 4 {
        return None;
    }
    let date = parse_date(fields[2])?;
    let time = parse_time(fields[3])?;
    Some(RawScanEvent {
        device_id: fields[0].to_string(),
        display_name: fields[1].to_string(),
        at: date.and_time(time),
    })
}

/// Parse a full export. Malformed lines are counted and logged, never fatal.
pub fn parse_scan_log(raw: &str) -> ScanLog {
    let mut log = ScanLog::default();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(event) = parse_line(line) else {
            warn!(line_no = idx + 1, line, "skipping malformed scanner line");
            log.skipped_lines += 1;
            continue;
        };
        if log.first_at.is_none() {
            log.first_at = Some(event.at);
        }
        log.by_name
            .entry(event.display_name.clone())
            .or_default()
            .push(event);
    }
    for events in log.by_name.values_mut() {
        events.sort_by_key(|e| e.at);
    }
    log
}
