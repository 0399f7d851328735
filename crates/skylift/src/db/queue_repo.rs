//! Upload queue repository — the durable job table and its state machine.
//!
//! States: `pending` → `in_flight` → `succeeded` | `failed`, with
//! `in_flight` → `pending` on retry scheduling and crash reclaim. The
//! `pending` → `in_flight` transition is the single serialization point
//! between concurrent processor runs and is performed with an atomic
//! compare-and-swap pop.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// Job lifecycle states as stored in the `state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::InFlight => "in_flight",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "in_flight" => Ok(JobState::InFlight),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// A row of the upload queue.
#[derive(Debug, Clone)]
pub struct UploadJobRow {
    pub id: i64,
    pub data_source_name: String,
    pub local_path: String,
    pub target_container: String,
    pub target_object_name: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub state: JobState,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub next_attempt_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UploadJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let state_str: String = row.get("state")?;
        let state = state_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            data_source_name: row.get("data_source_name")?,
            local_path: row.get("local_path")?,
            target_container: row.get("target_container")?,
            target_object_name: row.get("target_object_name")?,
            size_bytes: row.get("size_bytes")?,
            content_type: row.get("content_type")?,
            state,
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
            next_attempt_at: row.get("next_attempt_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields the watcher supplies when it enqueues a freshly observed file.
#[derive(Debug, Clone)]
pub struct NewUploadJob {
    pub data_source_name: String,
    pub local_path: String,
    pub target_container: String,
    pub target_object_name: String,
    pub size_bytes: i64,
    /// Content-type hint for backends that transmit one.
    pub content_type: Option<String>,
}

const COLUMNS: &str = "id, data_source_name, local_path, target_container, \
                       target_object_name, size_bytes, content_type, state, attempts, \
                       last_error, next_attempt_at, created_at, updated_at";

/// Enqueues a new pending job eligible immediately. Returns its id.
pub fn enqueue(db: &Database, job: &NewUploadJob, now: i64) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO upload_queue
             (data_source_name, local_path, target_container, target_object_name,
              size_bytes, content_type, state, attempts, next_attempt_at,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?7, ?7)",
            params![
                job.data_source_name,
                job.local_path,
                job.target_container,
                job.target_object_name,
                job.size_bytes,
                job.content_type,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Atomically claims the next eligible pending job, transitioning it to
/// `in_flight`. The inner SELECT and the state guard make the pop safe
/// against a concurrent claimant.
pub fn claim_next(db: &Database, now: i64) -> Result<Option<UploadJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!(
                    "UPDATE upload_queue
                     SET state = 'in_flight', updated_at = ?1
                     WHERE id = (
                         SELECT id FROM upload_queue
                         WHERE state = 'pending' AND next_attempt_at <= ?1
                         ORDER BY next_attempt_at ASC, id ASC
                         LIMIT 1
                     )
                     AND state = 'pending'
                     RETURNING {COLUMNS}"
                ),
                params![now],
                UploadJobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Claims up to `limit` eligible jobs.
pub fn claim_batch(
    db: &Database,
    limit: usize,
    now: i64,
) -> Result<Vec<UploadJobRow>, DatabaseError> {
    let mut claimed = Vec::with_capacity(limit);
    while claimed.len() < limit {
        match claim_next(db, now)? {
            Some(job) => claimed.push(job),
            None => break,
        }
    }
    Ok(claimed)
}

/// Resets `in_flight` rows whose `updated_at` is at or before `cutoff`
/// back to `pending`. Covers crash recovery; returns the reclaimed count.
pub fn reclaim_stale(db: &Database, cutoff: i64, now: i64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE upload_queue
             SET state = 'pending', last_error = 'reclaimed',
                 next_attempt_at = ?2, updated_at = ?2
             WHERE state = 'in_flight' AND updated_at <= ?1",
            params![cutoff, now],
        )?;
        Ok(changed)
    })
}

/// Terminal success transition. Clears `last_error`.
pub fn mark_succeeded(db: &Database, id: i64, attempts: i64, now: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE upload_queue
             SET state = 'succeeded', attempts = ?2, last_error = NULL, updated_at = ?3
             WHERE id = ?1",
            params![id, attempts, now],
        )?;
        Ok(())
    })
}

/// Terminal failure transition, storing the error message.
pub fn mark_failed(
    db: &Database,
    id: i64,
    attempts: i64,
    error: &str,
    now: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE upload_queue
             SET state = 'failed', attempts = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, attempts, error, now],
        )?;
        Ok(())
    })
}

/// Returns a job to `pending` for a later attempt after a transient failure.
pub fn schedule_retry(
    db: &Database,
    id: i64,
    attempts: i64,
    error: &str,
    next_attempt_at: i64,
    now: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE upload_queue
             SET state = 'pending', attempts = ?2, last_error = ?3,
                 next_attempt_at = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, attempts, error, next_attempt_at, now],
        )?;
        Ok(())
    })
}

/// Operator action: returns a `failed` job to `pending` with a clean
/// attempt counter, eligible immediately.
pub fn reset_failed(db: &Database, id: i64, now: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE upload_queue
             SET state = 'pending', attempts = 0, next_attempt_at = ?2, updated_at = ?2
             WHERE id = ?1 AND state = 'failed'",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// True when a pending or in-flight row references the path. The watcher
/// uses this to avoid enqueueing the same file twice.
pub fn has_active_row_for_path(db: &Database, path: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM upload_queue
             WHERE local_path = ?1 AND state IN ('pending', 'in_flight')",
            params![path],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// True when any non-failed row references the path. The cold-start scan
/// skips such files so restarts do not re-enqueue work that is queued,
/// running, or already delivered.
pub fn path_settled_or_queued(db: &Database, path: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM upload_queue
             WHERE local_path = ?1 AND state IN ('pending', 'in_flight', 'succeeded')",
            params![path],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Finds a job by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<UploadJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM upload_queue WHERE id = ?1"),
                params![id],
                UploadJobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists jobs in a given state, oldest first.
pub fn list_by_state(db: &Database, state: JobState) -> Result<Vec<UploadJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM upload_queue WHERE state = ?1 ORDER BY id ASC"
        ))?;
        let rows: Vec<UploadJobRow> = stmt
            .query_map(params![state.as_str()], UploadJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs in a given state.
pub fn count_by_state(db: &Database, state: JobState) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM upload_queue WHERE state = ?1",
            params![state.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
