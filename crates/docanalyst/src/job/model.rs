use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Success,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// `success` and `failed` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// Edges of the job state machine.
    ///
    /// `processing -> pending` is the requeue after a retryable failure.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Success)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted analysis request and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source_filename: String,
    pub query: String,
    /// Staged upload; internal, never exposed to status readers.
    #[serde(skip_serializing)]
    pub artifact_path: PathBuf,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the current `processing` claim was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn work_item(&self) -> WorkItem {
        WorkItem {
            job_id: self.id.clone(),
            query: self.query.clone(),
            artifact_path: self.artifact_path.clone(),
        }
    }

    /// Checks the record invariants that must hold in every snapshot.
    pub fn check_invariants(&self) -> Result<(), String> {
        let has_report = self.report.as_deref().is_some_and(|r| !r.is_empty());
        let has_error = self.error.as_deref().is_some_and(|e| !e.is_empty());

        match self.status {
            JobStatus::Pending | JobStatus::Processing => {
                if has_report || has_error {
                    return Err(format!("{} job carries a report or error", self.status));
                }
                if self.completed_at.is_some() {
                    return Err(format!("{} job has completed_at set", self.status));
                }
            }
            JobStatus::Success => {
                if !has_report || has_error {
                    return Err("success job must carry exactly a report".to_string());
                }
                if self.completed_at.is_none() {
                    return Err("success job has no completed_at".to_string());
                }
            }
            JobStatus::Failed => {
                if !has_error || has_report {
                    return Err("failed job must carry exactly an error".to_string());
                }
                if self.completed_at.is_none() {
                    return Err("failed job has no completed_at".to_string());
                }
            }
        }

        if self.query.is_empty() {
            return Err("job query is empty".to_string());
        }

        Ok(())
    }
}

/// A queued reference to a job awaiting worker pickup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub job_id: String,
    pub query: String,
    pub artifact_path: PathBuf,
}
