//! Job event broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::{Job, JobStatus};

/// One observable change in a job's lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    /// Pipeline step currently running, for progress events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Snapshot event for a committed status change.
    pub fn status_changed(job: &Job) -> Self {
        let message = match job.status {
            JobStatus::Pending if job.attempt_count == 0 => "Job queued".to_string(),
            JobStatus::Pending => format!("Attempt {} failed, job requeued", job.attempt_count),
            JobStatus::Processing => format!("Attempt {} started", job.attempt_count),
            JobStatus::Success => "Analysis completed".to_string(),
            JobStatus::Failed => job
                .error
                .clone()
                .unwrap_or_else(|| "Analysis failed".to_string()),
        };

        Self {
            job_id: job.id.clone(),
            status: job.status,
            attempt_count: job.attempt_count,
            stage: None,
            message,
            timestamp: Utc::now(),
        }
    }

    /// Progress event emitted while a stage runs.
    pub fn stage_progress(job_id: &str, attempt_count: u32, stage: &str, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Processing,
            attempt_count,
            stage: Some(stage.to_string()),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job events to any number of subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for JobEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEventBroadcaster")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}
