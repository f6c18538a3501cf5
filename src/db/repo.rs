use crate::model::{
    Booking, BookingChanges, BookingStatus, DiningTable, NewBooking, NewTable, TableChanges,
    TableStatus,
};
use crate::reconcile::{guard_table_update, reconcile_table_status, status_on_create};
use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Normalize the database url built from `app.data_dir` (or `DATABASE_URL`):
/// a leading `~/` is expanded and the directory holding the database file is
/// created. In-memory and non-SQLite urls are returned unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = expand_home(path);
    if let Some(dir) = Path::new(&path).parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(?err, dir = %dir.display(), "failed to create database directory");
        }
    }

    match query {
        Some(query) => format!("sqlite://{}?{}", path, query),
        None => format!("sqlite://{}", path),
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Users

#[instrument(skip_all)]
pub async fn insert_user(pool: &Pool, email: &str, full_name: Option<&str>) -> Result<i64> {
    let rec = sqlx::query("INSERT INTO users (email, full_name) VALUES (?, ?) RETURNING id")
        .bind(email)
        .bind(full_name)
        .fetch_one(pool)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn find_user_id_by_email(pool: &Pool, email: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Tables

const TABLE_COLUMNS: &str = "id, name, status, seats, created_at, updated_at";

fn map_table(row: &SqliteRow) -> Result<DiningTable> {
    let id: i64 = row.get("id");
    let status: String = row.get("status");
    let status = TableStatus::parse_state(&status)
        .ok_or_else(|| anyhow!("table {} has unknown status {}", id, status))?;
    Ok(DiningTable {
        id,
        name: row.get("name"),
        status,
        seats: row.get("seats"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[instrument(skip_all)]
pub async fn list_tables(pool: &Pool) -> Result<Vec<DiningTable>> {
    let rows = sqlx::query(&format!(
        "SELECT {TABLE_COLUMNS} FROM dining_tables WHERE deleted_at IS NULL ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_table).collect()
}

#[instrument(skip_all)]
pub async fn find_table(pool: &Pool, id: i64) -> Result<Option<DiningTable>> {
    let row = sqlx::query(&format!(
        "SELECT {TABLE_COLUMNS} FROM dining_tables WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(map_table).transpose()
}

#[instrument(skip_all)]
pub async fn create_table(pool: &Pool, new: &NewTable) -> Result<DiningTable> {
    let status = status_on_create(new.status);
    let id: i64 = sqlx::query(
        "INSERT INTO dining_tables (name, status, seats) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(&new.name)
    .bind(status.as_str())
    .bind(new.seats)
    .fetch_one(pool)
    .await?
    .get("id");
    find_table(pool, id)
        .await?
        .ok_or_else(|| anyhow!("table {} vanished after insert", id))
}

/// Apply edits to a table. A request to mark it READY is turned into BOOKED
/// while a WAITING booking still references it.
#[instrument(skip_all)]
pub async fn update_table(
    pool: &Pool,
    id: i64,
    changes: &TableChanges,
) -> Result<Option<DiningTable>> {
    let mut tx = pool.begin().await?;
    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM dining_tables WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;
    if exists.is_none() {
        return Ok(None);
    }

    let status = match changes.status {
        Some(requested) => {
            let has_waiting = waiting_exists_tx(&mut tx, id, None).await?;
            let guarded = guard_table_update(requested, has_waiting);
            if guarded != requested {
                info!(table_id = id, requested = requested.as_str(), "table still has waiting bookings; keeping BOOKED");
            }
            Some(guarded)
        }
        None => None,
    };

    sqlx::query(
        "UPDATE dining_tables SET name = COALESCE(?, name), seats = COALESCE(?, seats), \
         status = COALESCE(?, status), updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(changes.name.as_deref())
    .bind(changes.seats)
    .bind(status.map(|s| s.as_str()))
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    find_table(pool, id).await
}

#[instrument(skip_all)]
pub async fn delete_table(pool: &Pool, id: i64) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE dining_tables SET deleted_at = CURRENT_TIMESTAMP WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Bookings

const BOOKING_COLUMNS: &str =
    "id, table_id, status, customer_name, customer_phone, arrival_at, created_at, updated_at";

fn map_booking(row: &SqliteRow) -> Result<Booking> {
    let id: i64 = row.get("id");
    let status: String = row.get("status");
    let status = BookingStatus::parse_state(&status)
        .ok_or_else(|| anyhow!("booking {} has unknown status {}", id, status))?;
    Ok(Booking {
        id,
        table_id: row.get("table_id"),
        status,
        customer_name: row.get("customer_name"),
        customer_phone: row.try_get::<Option<String>, _>("customer_phone").ok().flatten(),
        arrival_at: row
            .try_get::<Option<chrono::NaiveDateTime>, _>("arrival_at")
            .ok()
            .flatten(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[instrument(skip_all)]
pub async fn list_bookings(pool: &Pool, table_id: Option<i64>) -> Result<Vec<Booking>> {
    let rows = sqlx::query(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings \
         WHERE deleted_at IS NULL AND (? IS NULL OR table_id = ?) ORDER BY id"
    ))
    .bind(table_id)
    .bind(table_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_booking).collect()
}

#[instrument(skip_all)]
pub async fn find_booking(pool: &Pool, id: i64) -> Result<Option<Booking>> {
    let row = sqlx::query(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(map_booking).transpose()
}

/// Insert a booking and project its status onto the table in one transaction.
/// Returns `None` when the table does not exist.
#[instrument(skip_all)]
pub async fn create_booking(pool: &Pool, new: &NewBooking) -> Result<Option<Booking>> {
    let mut tx = pool.begin().await?;
    let table = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM dining_tables WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(new.table_id)
    .fetch_optional(&mut *tx)
    .await?;
    if table.is_none() {
        return Ok(None);
    }

    let status = new.status.unwrap_or(BookingStatus::Waiting);
    let booking_id: i64 = sqlx::query(
        "INSERT INTO bookings (table_id, status, customer_name, customer_phone, arrival_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(new.table_id)
    .bind(status.as_str())
    .bind(&new.customer_name)
    .bind(new.customer_phone.as_deref())
    .bind(new.arrival_at)
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    apply_booking_event_tx(&mut tx, new.table_id, booking_id, status).await?;
    tx.commit().await?;
    find_booking(pool, booking_id).await
}

/// Apply edits to a booking. When a status is supplied the table projection is
/// recomputed inside the same transaction, so a failed projection also undoes
/// the booking change.
#[instrument(skip_all)]
pub async fn update_booking(
    pool: &Pool,
    id: i64,
    changes: &BookingChanges,
) -> Result<Option<Booking>> {
    let mut tx = pool.begin().await?;
    let table_id = sqlx::query_scalar::<_, i64>(
        "SELECT table_id FROM bookings WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(table_id) = table_id else {
        return Ok(None);
    };

    sqlx::query(
        "UPDATE bookings SET status = COALESCE(?, status), \
         customer_name = COALESCE(?, customer_name), \
         customer_phone = COALESCE(?, customer_phone), \
         arrival_at = COALESCE(?, arrival_at), updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(changes.status.map(|s| s.as_str()))
    .bind(changes.customer_name.as_deref())
    .bind(changes.customer_phone.as_deref())
    .bind(changes.arrival_at)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if let Some(status) = changes.status {
        apply_booking_event_tx(&mut tx, table_id, id, status).await?;
    }
    tx.commit().await?;
    find_booking(pool, id).await
}

#[instrument(skip_all)]
pub async fn delete_booking(pool: &Pool, id: i64) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE bookings SET deleted_at = CURRENT_TIMESTAMP WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

async fn waiting_exists_tx(
    tx: &mut Transaction<'_, Sqlite>,
    table_id: i64,
    exclude_booking: Option<i64>,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM bookings WHERE table_id = ? AND status = 'WAITING' \
         AND deleted_at IS NULL AND (? IS NULL OR id <> ?))",
    )
    .bind(table_id)
    .bind(exclude_booking)
    .bind(exclude_booking)
    .fetch_one(&mut **tx)
    .await?;
    Ok(exists)
}

/// Recompute a table's status after `booking_id` moved to `event`.
async fn apply_booking_event_tx(
    tx: &mut Transaction<'_, Sqlite>,
    table_id: i64,
    booking_id: i64,
    event: BookingStatus,
) -> Result<Option<TableStatus>> {
    let current: Option<String> = sqlx::query_scalar(
        "SELECT status FROM dining_tables WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(table_id)
    .fetch_optional(&mut **tx)
    .await?;
    let current = current.ok_or_else(|| anyhow!("table {} not found", table_id))?;
    let current = TableStatus::parse_state(&current)
        .ok_or_else(|| anyhow!("table {} has unknown status {}", table_id, current))?;

    let other_waiting = waiting_exists_tx(tx, table_id, Some(booking_id)).await?;
    let next = reconcile_table_status(current, event, other_waiting);
    if let Some(next) = next {
        sqlx::query(
            "UPDATE dining_tables SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(next.as_str())
        .bind(table_id)
        .execute(&mut **tx)
        .await?;
        info!(
            table_id,
            booking_id,
            event = event.as_str(),
            from = current.as_str(),
            to = next.as_str(),
            "table status reconciled"
        );
    }
    Ok(next)
}
