use std::time::Duration;

use thiserror::Error;

use crate::error::ExtractionError;

use super::stage::PipelineStep;

/// Failures reported by a single stage call.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("stage timed out: {0}")]
    Timeout(String),

    /// The reasoning service is rate limiting or otherwise unreachable.
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    /// The reasoning service refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Timeout(_)
            | StageError::Unavailable(_)
            | StageError::MalformedResponse(_)
            | StageError::Cancelled => true,
            StageError::Rejected(_) => false,
        }
    }
}

/// Why one pipeline attempt did not produce a report.
#[derive(Error, Debug)]
pub enum PipelineFailure {
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// The verify stage returned FAIL. Never retried.
    #[error("Verification failed: {reasoning}")]
    VerificationFailed { reasoning: String },

    #[error("Stage '{step}' failed: {source}")]
    Stage {
        step: PipelineStep,
        #[source]
        source: StageError,
    },

    #[error("Stage '{step}' returned invalid output: {reason}")]
    InvalidOutput { step: PipelineStep, reason: String },

    #[error("Cancelled before stage '{step}' completed")]
    Cancelled { step: PipelineStep },

    #[error("Attempt timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("Failed to start pipeline thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Pipeline thread panicked")]
    Panicked,
}

impl PipelineFailure {
    /// Transient failures are eligible for another attempt; everything else
    /// is conclusive about the document or the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineFailure::Extraction(e) => e.is_transient(),
            PipelineFailure::Stage { source, .. } => source.is_retryable(),
            PipelineFailure::Cancelled { .. }
            | PipelineFailure::TimedOut { .. }
            | PipelineFailure::Spawn(_) => true,
            PipelineFailure::VerificationFailed { .. }
            | PipelineFailure::InvalidOutput { .. }
            | PipelineFailure::Panicked => false,
        }
    }

    /// The step the failure is attributed to, if any.
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            PipelineFailure::Extraction(_) => Some(PipelineStep::Extract),
            PipelineFailure::VerificationFailed { .. } => Some(PipelineStep::Verify),
            PipelineFailure::Stage { step, .. }
            | PipelineFailure::InvalidOutput { step, .. }
            | PipelineFailure::Cancelled { step } => Some(*step),
            PipelineFailure::TimedOut { .. }
            | PipelineFailure::Spawn(_)
            | PipelineFailure::Panicked => None,
        }
    }
}
