//! Conversion job query operations.
//!
//! The `conversion_jobs` table is the durable ledger of cached full-file
//! conversions. Each source URL owns at most one row; state only moves
//! forward from `pending` to `ready` or `failed`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use streamforged_common::{truncate_diagnostic, ConversionStatus, Error, JobId, Result};

use crate::models::ConversionJob;

const JOB_COLUMNS: &str =
    "id, source_url, status, output_path, error_message, created_at, updated_at";

fn conversion_error(idx: usize, msg: impl Into<String>) -> rusqlite::Error {
    let msg: String = msg.into();
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ConversionJob> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(ConversionJob {
        id: id.parse().map_err(|e: uuid::Error| conversion_error(0, e.to_string()))?,
        source_url: row.get(1)?,
        status: status.parse().map_err(|e: String| conversion_error(2, e))?,
        output_path: row.get(3)?,
        error_message: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
        updated_at: parse_timestamp(6, &updated_at)?,
    })
}

/// Return the job for `source_url`, creating a pending one if none exists.
///
/// The insert and the lookup are keyed on the unique `source_url` column, so
/// concurrent callers (threads or processes sharing the database file) all
/// observe the same row. The boolean is `true` only for the caller whose
/// insert created it.
pub fn get_or_create_job(conn: &Connection, source_url: &str) -> Result<(ConversionJob, bool)> {
    let now = Utc::now().to_rfc3339();

    let inserted = conn
        .execute(
            "INSERT INTO conversion_jobs (id, source_url, status, created_at, updated_at)
             VALUES (?, ?, 'pending', ?, ?)
             ON CONFLICT(source_url) DO NOTHING",
            params![JobId::new().to_string(), source_url, &now, &now],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let job = get_job_by_url(conn, source_url)?
        .ok_or_else(|| Error::internal(format!("job for {} vanished after insert", source_url)))?;

    Ok((job, inserted == 1))
}

/// Get a conversion job by ID.
pub fn get_conversion_job(conn: &Connection, id: JobId) -> Result<ConversionJob> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM conversion_jobs WHERE id = ?"),
        [id.to_string()],
        row_to_job,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found("conversion_job", id),
        _ => Error::database(e.to_string()),
    })
}

/// Look up the job recorded for a source URL, if any.
pub fn get_job_by_url(conn: &Connection, source_url: &str) -> Result<Option<ConversionJob>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM conversion_jobs WHERE source_url = ?"),
        [source_url],
        row_to_job,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

fn ensure_exists(conn: &Connection, id: JobId) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM conversion_jobs WHERE id = ?)",
            [id.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if exists {
        Ok(())
    } else {
        Err(Error::not_found("conversion_job", id))
    }
}

/// Mark a pending job ready with the path of its artifact.
///
/// Returns `Ok(false)` without touching the row when the job is already
/// terminal.
pub fn complete_job(conn: &Connection, id: JobId, output_path: &str) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE conversion_jobs
             SET status = 'ready', output_path = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
            params![output_path, Utc::now().to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if updated == 0 {
        ensure_exists(conn, id)?;
        return Ok(false);
    }
    Ok(true)
}

/// Mark a pending job failed with diagnostic text.
///
/// Returns `Ok(false)` without touching the row when the job is already
/// terminal.
pub fn fail_job(conn: &Connection, id: JobId, error_message: &str) -> Result<bool> {
    let message = truncate_diagnostic(error_message);
    let updated = conn
        .execute(
            "UPDATE conversion_jobs
             SET status = 'failed', error_message = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
            params![message, Utc::now().to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if updated == 0 {
        ensure_exists(conn, id)?;
        return Ok(false);
    }
    Ok(true)
}

/// Fail every job still pending, returning how many were reset.
///
/// Called at startup: no engine process survives a restart, so a pending row
/// left behind would otherwise stay pending forever.
pub fn reset_orphaned_jobs(conn: &Connection, reason: &str) -> Result<usize> {
    conn.execute(
        "UPDATE conversion_jobs
         SET status = 'failed', error_message = ?, updated_at = ?
         WHERE status = 'pending'",
        params![reason, Utc::now().to_rfc3339()],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// List jobs, newest first, optionally filtered by status.
pub fn list_jobs(
    conn: &Connection,
    status: Option<ConversionStatus>,
    limit: u32,
) -> Result<Vec<ConversionJob>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM conversion_jobs
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC
             LIMIT ?2"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let jobs = stmt
        .query_map(params![status.map(|s| s.to_string()), limit], row_to_job)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(jobs)
}
