//! Job record store backed by the `jobs` table.
//!
//! [`JobStore::transition`] is the only way to mutate a persisted job. It is
//! a conditional write: the new status is applied only if the current status
//! is in the caller's precondition set, which gives compare-and-swap
//! semantics without a separate lock manager.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::db::job_repo::{self, JobRow, StatusUpdate, UpdateOutcome};
use crate::db::Database;
use crate::error::StoreError;

use super::model::{Job, JobStatus};

fn format_timestamp(dt: DateTime<Utc>) -> String {
    // Fixed width so lexical order in SQL matches chronological order.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, job_id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            job_id: job_id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn parse_optional_timestamp(
    s: Option<&str>,
    job_id: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.map(|s| parse_timestamp(s, job_id)).transpose()
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| StoreError::Corrupt {
            job_id: row.id.clone(),
            reason: format!("unknown status '{}'", row.status),
        })?;
        let attempt_count = u32::try_from(row.attempt_count).map_err(|_| StoreError::Corrupt {
            job_id: row.id.clone(),
            reason: format!("attempt_count out of range: {}", row.attempt_count),
        })?;

        Ok(Job {
            created_at: parse_timestamp(&row.created_at, &row.id)?,
            updated_at: parse_timestamp(&row.updated_at, &row.id)?,
            claimed_at: parse_optional_timestamp(row.claimed_at.as_deref(), &row.id)?,
            completed_at: parse_optional_timestamp(row.completed_at.as_deref(), &row.id)?,
            artifact_path: PathBuf::from(row.artifact_path),
            source_filename: row.source_filename,
            query: row.query,
            status,
            report: row.report,
            error: row.error,
            attempt_count,
            id: row.id,
        })
    }
}

/// Fields merged into a record by [`JobStore::transition`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub report: Option<String>,
    pub error: Option<String>,
    /// Counts this transition as a new execution attempt.
    pub increment_attempt: bool,
    /// Applies the transition only while the job is still on this attempt.
    pub expected_attempt: Option<u32>,
}

impl TransitionFields {
    pub fn none() -> Self {
        Self::default()
    }

    /// Claim by a worker: starts a new attempt.
    pub fn claim() -> Self {
        Self {
            increment_attempt: true,
            ..Self::default()
        }
    }

    pub fn report(report: impl Into<String>) -> Self {
        Self {
            report: Some(report.into()),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Fences the transition to `attempt`, so a writer holding an older
    /// snapshot cannot move a newer attempt.
    pub fn at_attempt(mut self, attempt: u32) -> Self {
        self.expected_attempt = Some(attempt);
        self
    }
}

/// Persistent job store. Cloning is cheap; clones share the database handle.
#[derive(Clone, Debug)]
pub struct JobStore {
    db: Database,
    events: Option<JobEventBroadcaster>,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db, events: None }
    }

    /// Creates a store that publishes every committed change.
    pub fn with_events(db: Database, events: JobEventBroadcaster) -> Self {
        Self {
            db,
            events: Some(events),
        }
    }

    pub fn events(&self) -> Option<&JobEventBroadcaster> {
        self.events.as_ref()
    }

    /// Creates a `pending` job. Visible to readers as soon as this returns.
    pub fn create(
        &self,
        source_filename: &str,
        query: &str,
        artifact_path: &Path,
    ) -> Result<Job, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        if query.is_empty() {
            return Err(StoreError::InvalidFields {
                job_id: id,
                requested: JobStatus::Pending,
                reason: "query must not be empty".to_string(),
            });
        }

        let now = format_timestamp(Utc::now());
        let row = JobRow {
            id,
            source_filename: source_filename.to_string(),
            query: query.to_string(),
            artifact_path: artifact_path.to_string_lossy().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            report: None,
            error: None,
            attempt_count: 0,
            created_at: now.clone(),
            updated_at: now,
            claimed_at: None,
            completed_at: None,
        };

        job_repo::insert(&self.db, &row)?;
        let job = Job::try_from(row)?;

        log::debug!("Created job {} for '{}'", job.id, job.source_filename);
        self.publish(&job);
        Ok(job)
    }

    /// Atomically moves a job to `to` if its current status is in `from`
    /// and, for fenced fields, its attempt count still matches.
    ///
    /// Preconditions that are not edges of the state machine are ignored, so
    /// a terminal job can never be moved whatever the caller passes. Fails
    /// with [`StoreError::InvalidTransition`] when the precondition does not
    /// hold and with [`StoreError::InvalidFields`] when `fields` would break
    /// the report/error invariants of the target status.
    pub fn transition(
        &self,
        job_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, StoreError> {
        validate_fields(job_id, to, &fields)?;

        let allowed_from: Vec<&str> = from
            .iter()
            .filter(|status| status.can_transition_to(to))
            .map(|status| status.as_str())
            .collect();

        let now = Utc::now();
        let now_str = format_timestamp(now);
        let claimed_at = (to == JobStatus::Processing).then_some(now_str.as_str());
        let completed_at = to.is_terminal().then_some(now_str.as_str());

        let update = StatusUpdate {
            id: job_id,
            allowed_from: &allowed_from,
            status: to.as_str(),
            report: fields.report.as_deref(),
            error: fields.error.as_deref(),
            attempt_increment: i64::from(fields.increment_attempt),
            expected_attempt: fields.expected_attempt.map(i64::from),
            claimed_at,
            completed_at,
            updated_at: &now_str,
        };

        match job_repo::update_status_if(&self.db, &update)? {
            UpdateOutcome::Applied(row) => {
                let job = Job::try_from(row)?;
                log::debug!(
                    "Job {} -> {} (attempt {})",
                    job.id,
                    job.status,
                    job.attempt_count
                );
                self.publish(&job);
                Ok(job)
            }
            UpdateOutcome::Rejected { current_status } => {
                let current =
                    JobStatus::parse(&current_status).ok_or_else(|| StoreError::Corrupt {
                        job_id: job_id.to_string(),
                        reason: format!("unknown status '{}'", current_status),
                    })?;
                Err(StoreError::InvalidTransition {
                    job_id: job_id.to_string(),
                    current,
                    requested: to,
                })
            }
            UpdateOutcome::Missing => Err(StoreError::NotFound(job_id.to_string())),
        }
    }

    pub fn get(&self, job_id: &str) -> Result<Job, StoreError> {
        match job_repo::find_by_id(&self.db, job_id)? {
            Some(row) => Job::try_from(row),
            None => Err(StoreError::NotFound(job_id.to_string())),
        }
    }

    /// Up to `limit` jobs, newest first. Each call re-reads current state.
    pub fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        job_repo::list_recent(&self.db, limit as u64)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    /// All jobs currently in `status`, oldest first.
    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        job_repo::list_by_status(&self.db, status.as_str())?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    /// `processing` jobs claimed at or before `claimed_before`.
    pub fn list_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        job_repo::list_stale_processing(&self.db, &format_timestamp(claimed_before))?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    fn publish(&self, job: &Job) {
        if let Some(events) = &self.events {
            events.send(JobEvent::status_changed(job));
        }
    }
}

fn validate_fields(
    job_id: &str,
    to: JobStatus,
    fields: &TransitionFields,
) -> Result<(), StoreError> {
    let invalid = |reason: &str| {
        Err(StoreError::InvalidFields {
            job_id: job_id.to_string(),
            requested: to,
            reason: reason.to_string(),
        })
    };
    let has_report = fields.report.as_deref().is_some_and(|r| !r.is_empty());
    let has_error = fields.error.as_deref().is_some_and(|e| !e.is_empty());

    match to {
        JobStatus::Success if !has_report => invalid("success requires a non-empty report"),
        JobStatus::Failed if !has_error => invalid("failed requires a non-empty error"),
        JobStatus::Success if fields.error.is_some() => invalid("success cannot carry an error"),
        JobStatus::Failed if fields.report.is_some() => invalid("failed cannot carry a report"),
        JobStatus::Pending | JobStatus::Processing
            if fields.report.is_some() || fields.error.is_some() =>
        {
            invalid("non-terminal states carry neither report nor error")
        }
        JobStatus::Processing if !fields.increment_attempt => {
            invalid("a claim must count as an attempt")
        }
        _ if to != JobStatus::Processing && fields.increment_attempt => {
            invalid("only a claim counts as an attempt")
        }
        _ => Ok(()),
    }
}
