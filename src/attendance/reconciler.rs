use super::parser::{parse_scan_log, RawScanEvent, ScanLog};
use crate::db::{
    self, AttendanceBatch, DayInterval, NewScan, Pool, StoredBatch, StoredScans, UpsertKind,
};
use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{error, info, instrument, warn};

/// Upper bound on accounts folded at the same time.
const MAX_CONCURRENT_FOLDS: usize = 8;

#[derive(Debug, Clone)]
pub struct AttendanceSettings {
    pub email_domain: String,
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub target_date: NaiveDate,
    pub dedup_day: Option<NaiveDate>,
    pub parsed_events: usize,
    pub skipped_lines: usize,
    pub inserted_records: u64,
    pub folded_users: usize,
    pub timekeeping_created: usize,
    pub timekeeping_updated: usize,
    pub unresolved_names: Vec<String>,
}

impl IngestReport {
    fn empty(target_date: NaiveDate) -> Self {
        Self {
            target_date,
            dedup_day: None,
            parsed_events: 0,
            skipped_lines: 0,
            inserted_records: 0,
            folded_users: 0,
            timekeeping_created: 0,
            timekeeping_updated: 0,
            unresolved_names: Vec::new(),
        }
    }
}

/// Display names that resolve to the same account fold together. Unmatched
/// names group by their lookup email.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    User(i64),
    Unmatched(String),
}

#[derive(Debug, Default)]
struct FoldGroup {
    names: Vec<String>,
    delta: Vec<NewScan>,
    events: Vec<RawScanEvent>,
}

impl FoldGroup {
    fn label(&self) -> String {
        self.names.join(",")
    }
}

/// Email used to look up the account behind a scanner display name.
pub fn user_email(display_name: &str, email_domain: &str) -> String {
    format!("{}@{}", display_name.to_lowercase(), email_domain)
}

/// Scans of `events` not yet stored for `display_name`, without repeats.
pub fn dedup_delta(display_name: &str, events: &[RawScanEvent], stored: &StoredScans) -> Vec<NewScan> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| !stored.contains(display_name, &e.at))
        .filter(|e| seen.insert(e.at))
        .map(|e| NewScan {
            display_name: display_name.to_string(),
            scanned_at: e.at,
            device_id: Some(e.device_id.clone()),
        })
        .collect()
}

/// First-in and last-out over every scan of the run. Disjoint windows within
/// a day collapse into a single interval.
pub fn fold_interval(events: &[RawScanEvent]) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let check_in = events.iter().map(|e| e.at).min()?;
    let check_out = events.iter().map(|e| e.at).max()?;
    Some((check_in, check_out))
}

async fn group_by_account(
    pool: &Pool,
    settings: &AttendanceSettings,
    log: ScanLog,
    stored: &StoredScans,
) -> Result<BTreeMap<GroupKey, FoldGroup>> {
    let mut accounts: HashMap<String, Option<i64>> = HashMap::new();
    let mut groups: BTreeMap<GroupKey, FoldGroup> = BTreeMap::new();

    for (name, events) in log.by_name {
        let email = user_email(&name, &settings.email_domain);
        let user_id = match accounts.get(&email) {
            Some(user_id) => *user_id,
            None => {
                let user_id = db::find_user_id_by_email(pool, &email).await?;
                accounts.insert(email.clone(), user_id);
                user_id
            }
        };
        let key = match user_id {
            Some(id) => GroupKey::User(id),
            None => {
                warn!(display_name = %name, %email, "no account for scanner name; storing scans without user");
                GroupKey::Unmatched(email)
            }
        };

        let delta = dedup_delta(&name, &events, stored);
        let group = groups.entry(key).or_default();
        group.delta.extend(delta);
        group.events.extend(events);
        group.names.push(name);
    }
    Ok(groups)
}

async fn store_group(pool: Pool, label: String, batch: AttendanceBatch) -> (String, Result<StoredBatch>) {
    let res = db::store_attendance_batch(&pool, &batch).await;
    (label, res)
}

/// Ingest one scanner export.
///
/// New scans are appended to the scanner log (deduplicated against the day of
/// the first parsed scan). Every account with new scans gets its timekeeping
/// row for `target_date` rewritten from all of its scans in this file, across
/// every display name that resolves to it. Names that match no account keep
/// their scans with a null user.
///
/// Each account is written in its own transaction. All of them are awaited;
/// if any fails the run fails after the others have finished, and the failed
/// account's scans stay unstored so a rerun picks them up.
#[instrument(skip_all, fields(target_date = %target_date))]
pub async fn reconcile_attendance(
    pool: &Pool,
    settings: &AttendanceSettings,
    raw: &str,
    target_date: NaiveDate,
) -> Result<IngestReport> {
    let log = parse_scan_log(raw);
    let mut report = IngestReport::empty(target_date);
    report.parsed_events = log.event_count();
    report.skipped_lines = log.skipped_lines;

    let Some(day) = log.dedup_day() else {
        info!(skipped = log.skipped_lines, "scanner export has no scans");
        return Ok(report);
    };
    report.dedup_day = Some(day);

    let stored = db::stored_scans_for_day(pool, day).await?;
    if stored.is_empty() {
        info!(%day, "no scans stored for day yet; ingesting every name");
    }

    let groups = group_by_account(pool, settings, log, &stored).await?;
    let mut unresolved = HashMap::new();
    let mut batches = Vec::new();
    for (key, group) in groups {
        if group.delta.is_empty() {
            continue;
        }
        let label = group.label();
        let user_id = match key {
            GroupKey::User(id) => Some(id),
            GroupKey::Unmatched(_) => {
                unresolved.insert(label.clone(), group.names.clone());
                None
            }
        };
        let interval = fold_interval(&group.events).map(|(check_in, check_out)| DayInterval {
            day: target_date,
            check_in,
            check_out,
        });
        batches.push((
            label,
            AttendanceBatch {
                user_id,
                scans: group.delta,
                interval,
            },
        ));
    }

    let owned_pool = pool.clone();
    let results: Vec<(String, Result<StoredBatch>)> = stream::iter(batches)
        .map(move |(label, batch)| store_group(owned_pool.clone(), label, batch))
        .buffer_unordered(MAX_CONCURRENT_FOLDS)
        .collect()
        .await;

    let mut failures = Vec::new();
    for (label, res) in results {
        match res {
            Ok(stored) => {
                report.inserted_records += stored.inserted;
                match stored.upsert {
                    Some(UpsertKind::Created) => report.timekeeping_created += 1,
                    Some(UpsertKind::Updated) => report.timekeeping_updated += 1,
                    None => {
                        if let Some(names) = unresolved.remove(&label) {
                            report.unresolved_names.extend(names);
                        }
                    }
                }
                report.folded_users += 1;
            }
            Err(err) => {
                error!(display_names = %label, ?err, "attendance fold failed");
                failures.push(format!("{}: {:#}", label, err));
            }
        }
    }
    report.unresolved_names.sort();

    if !failures.is_empty() {
        return Err(anyhow!(
            "attendance reconciliation failed for {} account(s): {}",
            failures.len(),
            failures.join("; ")
        ));
    }

    info!(
        %day,
        inserted = report.inserted_records,
        created = report.timekeeping_created,
        updated = report.timekeeping_updated,
        unresolved = report.unresolved_names.len(),
        "attendance reconciled"
    );
    Ok(report)
}
