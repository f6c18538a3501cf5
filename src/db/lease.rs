//! Named job leases.
//!
//! A lease row is owned by whoever holds its token until `expires_at`. An
//! expired lease can be taken over, so a crashed holder never blocks a job
//! forever.

use super::repo::Pool;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

/// Try to take the lease `name` for `ttl`. Returns `false` while another
/// unexpired holder exists.
#[instrument(skip_all, fields(name = name))]
pub async fn try_acquire_lease(
    pool: &Pool,
    name: &str,
    token: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO job_leases (name, token, acquired_at, expires_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET token = excluded.token, \
             acquired_at = excluded.acquired_at, expires_at = excluded.expires_at \
         WHERE job_leases.expires_at <= excluded.acquired_at",
    )
    .bind(name)
    .bind(token)
    .bind(now)
    .bind(now + ttl)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Release the lease if `token` still owns it.
#[instrument(skip_all, fields(name = name))]
pub async fn release_lease(pool: &Pool, name: &str, token: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM job_leases WHERE name = ? AND token = ?")
        .bind(name)
        .bind(token)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn lease_holder(pool: &Pool, name: &str) -> Result<Option<String>> {
    let token = sqlx::query_scalar::<_, String>("SELECT token FROM job_leases WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(token)
}
