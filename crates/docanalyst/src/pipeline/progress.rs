use crate::broadcast::{JobEvent, JobEventBroadcaster};

use super::stage::PipelineStep;

/// Events emitted by the pipeline while it runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { step: PipelineStep, message: String },
    Finished { step: PipelineStep, message: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and runs without subscribers.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events to the job event channel.
pub struct BroadcastProgress {
    job_id: String,
    attempt_count: u32,
    events: JobEventBroadcaster,
}

impl BroadcastProgress {
    pub fn new(job_id: &str, attempt_count: u32, events: JobEventBroadcaster) -> Self {
        Self {
            job_id: job_id.to_string(),
            attempt_count,
            events,
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        let (step, message) = match &event {
            ProgressEvent::Started { step, message } | ProgressEvent::Finished { step, message } => {
                (step, message)
            }
        };
        self.events.send(JobEvent::stage_progress(
            &self.job_id,
            self.attempt_count,
            step.as_str(),
            message,
        ));
    }
}
