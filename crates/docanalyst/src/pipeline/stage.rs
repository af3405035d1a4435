//! The stage capability the pipeline depends on.
//!
//! A [`Stage`] turns the extracted document text plus the caller's query into
//! a partial result. Production stages call out to a reasoning service; tests
//! plug in scripted stubs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::StageError;

/// Named steps of one pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    Extract,
    Verify,
    Analyze,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Extract => "extract",
            PipelineStep::Verify => "verify",
            PipelineStep::Analyze => "analyze",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only input handed to every stage.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub query: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// Outcome of a gate stage such as `verify`.
    Verdict { passed: bool, reasoning: String },
    /// Final report text.
    Report(String),
}

/// Cooperative cancellation signal shared between the scheduler and a
/// running pipeline. Stages that block for a long time should poll it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Stage: Send + Sync {
    fn run(
        &self,
        input: &StageInput<'_>,
        cancel: &CancellationFlag,
    ) -> Result<StageOutput, StageError>;
}
