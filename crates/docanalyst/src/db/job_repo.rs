//! Job repository: row-level SQL for the `jobs` table.
//!
//! Status values and timestamps are plain strings here; the typed view lives
//! in [`crate::job::JobStore`].

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub source_filename: String,
    pub query: String,
    pub artifact_path: String,
    pub status: String,
    pub report: Option<String>,
    pub error: Option<String>,
    pub attempt_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub claimed_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_filename: row.get("source_filename")?,
            query: row.get("query")?,
            artifact_path: row.get("artifact_path")?,
            status: row.get("status")?,
            report: row.get("report")?,
            error: row.get("error")?,
            attempt_count: row.get("attempt_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            claimed_at: row.get("claimed_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// A conditional status update: applied only while the row's current status
/// is one of `allowed_from` and, when `expected_attempt` is set, while the
/// row is still on that attempt.
#[derive(Debug)]
pub struct StatusUpdate<'a> {
    pub id: &'a str,
    pub allowed_from: &'a [&'a str],
    pub status: &'a str,
    pub report: Option<&'a str>,
    pub error: Option<&'a str>,
    pub attempt_increment: i64,
    /// Fences the update to the attempt the caller observed.
    pub expected_attempt: Option<i64>,
    pub claimed_at: Option<&'a str>,
    /// Only written when the column is still NULL.
    pub completed_at: Option<&'a str>,
    pub updated_at: &'a str,
}

/// Result of a [`StatusUpdate`].
#[derive(Debug)]
pub enum UpdateOutcome {
    Applied(JobRow),
    Rejected { current_status: String },
    Missing,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, source_filename, query, artifact_path, status, report, error,
             attempt_count, created_at, updated_at, claimed_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.source_filename,
                job.query,
                job.artifact_path,
                job.status,
                job.report,
                job.error,
                job.attempt_count,
                job.created_at,
                job.updated_at,
                job.claimed_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Applies a conditional status update.
///
/// The `UPDATE ... WHERE status IN (...) [AND attempt_count = ?]` and the
/// read-back run under the same connection lock, so the check and the write
/// are a single compare-and-swap.
pub fn update_status_if(
    db: &Database,
    update: &StatusUpdate<'_>,
) -> Result<UpdateOutcome, DatabaseError> {
    db.with_conn(|conn| {
        if update.allowed_from.is_empty() {
            return Ok(match select_by_id(conn, update.id)? {
                Some(row) => UpdateOutcome::Rejected {
                    current_status: row.status,
                },
                None => UpdateOutcome::Missing,
            });
        }

        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(update.status.to_string()),
            Box::new(update.report.map(str::to_string)),
            Box::new(update.error.map(str::to_string)),
            Box::new(update.attempt_increment),
            Box::new(update.claimed_at.map(str::to_string)),
            Box::new(update.completed_at.map(str::to_string)),
            Box::new(update.updated_at.to_string()),
            Box::new(update.id.to_string()),
        ];

        let mut placeholders = Vec::with_capacity(update.allowed_from.len());
        for status in update.allowed_from {
            param_values.push(Box::new(status.to_string()));
            placeholders.push(format!("?{}", param_values.len()));
        }

        let mut sql = format!(
            "UPDATE jobs SET status = ?1, report = ?2, error = ?3,
             attempt_count = attempt_count + ?4, claimed_at = ?5,
             completed_at = COALESCE(completed_at, ?6), updated_at = ?7
             WHERE id = ?8 AND status IN ({})",
            placeholders.join(", ")
        );
        if let Some(attempt) = update.expected_attempt {
            param_values.push(Box::new(attempt));
            sql.push_str(&format!(" AND attempt_count = ?{}", param_values.len()));
        }

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let changed = conn.execute(&sql, params_ref.as_slice())?;

        let row = select_by_id(conn, update.id)?;
        Ok(match (changed, row) {
            (0, Some(row)) => UpdateOutcome::Rejected {
                current_status: row.status,
            },
            (_, Some(row)) => UpdateOutcome::Applied(row),
            (_, None) => UpdateOutcome::Missing,
        })
    })
}

/// Returns up to `limit` jobs, newest first.
pub fn list_recent(db: &Database, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns all jobs with the given status, oldest first.
pub fn list_by_status(db: &Database, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC")?;
        let rows = stmt
            .query_map(params![status], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns `processing` jobs whose claim is at or before `cutoff`.
pub fn list_stale_processing(db: &Database, cutoff: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = 'processing'
             AND (claimed_at IS NULL OR claimed_at <= ?1)
             ORDER BY claimed_at ASC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
