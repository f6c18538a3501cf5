use super::model::{AttendanceBatch, DayInterval, StoredBatch, StoredScans, UpsertKind};
use super::repo::Pool;
use crate::model::Timekeeping;
use anyhow::{anyhow, Context, Result};
use chrono::{Days, NaiveDate, NaiveDateTime};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{instrument, warn};

const GROUP_SEPARATOR: &str = "|";

fn day_bounds(day: NaiveDate) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let start = day.and_hms_opt(0, 0, 0).ok_or_else(|| anyhow!("invalid day {}", day))?;
    let end = day
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow!("day {} out of range", day))?;
    Ok((start, end))
}

fn parse_stored_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Load scanner timestamps already stored for `day`, grouped by display name.
#[instrument(skip_all, fields(day = %day))]
pub async fn stored_scans_for_day(pool: &Pool, day: NaiveDate) -> Result<StoredScans> {
    let (start, end) = day_bounds(day)?;
    let rows = sqlx::query(
        "SELECT display_name, GROUP_CONCAT(scanned_at, '|') AS scans \
         FROM finger_scanner_records \
         WHERE scanned_at >= ? AND scanned_at < ? AND deleted_at IS NULL \
         GROUP BY display_name",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let mut stored = StoredScans::default();
    for row in rows {
        let name: String = row.get("display_name");
        let scans: String = row.try_get::<Option<String>, _>("scans")?.unwrap_or_default();
        let set = stored.by_name.entry(name.clone()).or_default();
        for raw in scans.split(GROUP_SEPARATOR).filter(|s| !s.is_empty()) {
            match parse_stored_timestamp(raw) {
                Some(at) => {
                    set.insert(at);
                }
                None => warn!(display_name = %name, raw, "unparseable stored scan timestamp"),
            }
        }
    }
    Ok(stored)
}

/// Append the batch's scans and write its interval in one transaction. A
/// failed interval write rolls the scans back, so the next run sees them as
/// new and folds them again.
#[instrument(skip_all, fields(user_id = ?batch.user_id, count = batch.scans.len()))]
pub async fn store_attendance_batch(pool: &Pool, batch: &AttendanceBatch) -> Result<StoredBatch> {
    let mut tx = pool.begin().await?;
    // Writes come first so the transaction takes the write lock before any read.
    let mut inserted = 0;
    for scan in &batch.scans {
        sqlx::query(
            "INSERT INTO finger_scanner_records (user_id, display_name, scanned_at, device_id) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(batch.user_id)
        .bind(&scan.display_name)
        .bind(scan.scanned_at)
        .bind(scan.device_id.as_deref())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert scan for {}", scan.display_name))?;
        inserted += 1;
    }

    let upsert = match (batch.user_id, batch.interval) {
        (Some(user_id), Some(interval)) => {
            Some(upsert_timekeeping_tx(&mut tx, user_id, &interval).await?)
        }
        _ => None,
    };
    tx.commit().await?;
    Ok(StoredBatch { inserted, upsert })
}

/// Count stored scanner records, optionally restricted to one day.
pub async fn count_scanner_records(pool: &Pool, day: Option<NaiveDate>) -> Result<i64> {
    let count: i64 = match day {
        Some(day) => {
            let (start, end) = day_bounds(day)?;
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM finger_scanner_records \
                 WHERE scanned_at >= ? AND scanned_at < ? AND deleted_at IS NULL",
            )
            .bind(start)
            .bind(end)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM finger_scanner_records WHERE deleted_at IS NULL",
            )
            .fetch_one(pool)
            .await?
        }
    };
    Ok(count)
}

/// Write the first-in/last-out interval for a user and day, overwriting any
/// interval already stored for that pair.
async fn upsert_timekeeping_tx(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    interval: &DayInterval,
) -> Result<UpsertKind> {
    let existed: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM timekeepings \
         WHERE user_id = ? AND day = ? AND deleted_at IS NULL)",
    )
    .bind(user_id)
    .bind(interval.day)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO timekeepings (user_id, day, check_in, check_out) VALUES (?, ?, ?, ?) \
         ON CONFLICT(user_id, day) WHERE deleted_at IS NULL DO UPDATE SET \
             check_in = excluded.check_in, check_out = excluded.check_out, \
             updated_at = CURRENT_TIMESTAMP",
    )
    .bind(user_id)
    .bind(interval.day)
    .bind(interval.check_in)
    .bind(interval.check_out)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to write timekeeping for user {}", user_id))?;

    Ok(if existed {
        UpsertKind::Updated
    } else {
        UpsertKind::Created
    })
}

#[instrument(skip_all, fields(day = %day))]
pub async fn list_timekeeping(pool: &Pool, day: NaiveDate) -> Result<Vec<Timekeeping>> {
    let rows = sqlx::query(
        "SELECT id, user_id, day, check_in, check_out FROM timekeepings \
         WHERE day = ? AND deleted_at IS NULL ORDER BY user_id",
    )
    .bind(day)
    .fetch_all(pool)
    .await?;

    let entries = rows
        .into_iter()
        .map(|row| Timekeeping {
            id: row.get("id"),
            user_id: row.get("user_id"),
            day: row.get("day"),
            check_in: row.get("check_in"),
            check_out: row.get("check_out"),
        })
        .collect();
    Ok(entries)
}
