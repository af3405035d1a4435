use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::extract::TextExtractor;
use crate::sanitize;

use super::error::PipelineFailure;
use super::progress::{ProgressEvent, ProgressReporter};
use super::stage::{CancellationFlag, PipelineStep, Stage, StageInput, StageOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub report: String,
}

/// Runs `extract -> verify -> analyze` for one job attempt.
///
/// The runner never touches the job record; it only sees the query and the
/// artifact path and hands back an outcome. It has no internal retry.
#[derive(Clone)]
pub struct PipelineRunner {
    extractor: Arc<dyn TextExtractor>,
    verify: Arc<dyn Stage>,
    analyze: Arc<dyn Stage>,
}

impl PipelineRunner {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        verify: Arc<dyn Stage>,
        analyze: Arc<dyn Stage>,
    ) -> Self {
        Self {
            extractor,
            verify,
            analyze,
        }
    }

    pub fn run(
        &self,
        query: &str,
        artifact_path: &Path,
        cancel: &CancellationFlag,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineResult, PipelineFailure> {
        let _pipeline_span = info_span!(
            "pipeline",
            file = %sanitize::redact_path(artifact_path),
        )
        .entered();

        // Step 1: extract text once, before any stage runs
        let text = {
            let _step = info_span!("extract").entered();
            progress.report(ProgressEvent::Started {
                step: PipelineStep::Extract,
                message: "Extracting document text...".to_string(),
            });
            let text = self.extractor.extract_text(artifact_path)?;
            progress.report(ProgressEvent::Finished {
                step: PipelineStep::Extract,
                message: format!("Extracted {} characters", text.chars().count()),
            });
            text
        };

        let input = StageInput { query, text: &text };

        // Step 2: verify gate
        match self.run_stage(PipelineStep::Verify, self.verify.as_ref(), &input, cancel, progress)? {
            StageOutput::Verdict {
                passed: true,
                reasoning,
            } => {
                debug!(
                    "Verification passed: {}",
                    sanitize::truncate_for_log(&reasoning, 200)
                );
            }
            StageOutput::Verdict {
                passed: false,
                reasoning,
            } => {
                warn!(
                    "Verification failed: {}",
                    sanitize::truncate_for_log(&reasoning, 200)
                );
                return Err(PipelineFailure::VerificationFailed { reasoning });
            }
            StageOutput::Report(_) => {
                return Err(PipelineFailure::InvalidOutput {
                    step: PipelineStep::Verify,
                    reason: "expected a verdict, got a report".to_string(),
                });
            }
        }

        // Step 3: analyze
        match self.run_stage(PipelineStep::Analyze, self.analyze.as_ref(), &input, cancel, progress)? {
            StageOutput::Report(report) if !report.trim().is_empty() => {
                Ok(PipelineResult { report })
            }
            StageOutput::Report(_) => Err(PipelineFailure::InvalidOutput {
                step: PipelineStep::Analyze,
                reason: "report is empty".to_string(),
            }),
            StageOutput::Verdict { .. } => Err(PipelineFailure::InvalidOutput {
                step: PipelineStep::Analyze,
                reason: "expected a report, got a verdict".to_string(),
            }),
        }
    }

    fn run_stage(
        &self,
        step: PipelineStep,
        stage: &dyn Stage,
        input: &StageInput<'_>,
        cancel: &CancellationFlag,
        progress: &dyn ProgressReporter,
    ) -> Result<StageOutput, PipelineFailure> {
        let _step = info_span!("stage", name = step.as_str()).entered();

        if cancel.is_cancelled() {
            return Err(PipelineFailure::Cancelled { step });
        }

        progress.report(ProgressEvent::Started {
            step,
            message: format!("Running {} stage...", step),
        });

        let output = stage.run(input, cancel).map_err(|source| match source {
            super::StageError::Cancelled => PipelineFailure::Cancelled { step },
            source => PipelineFailure::Stage { step, source },
        })?;

        progress.report(ProgressEvent::Finished {
            step,
            message: format!("{} stage finished", step),
        });
        Ok(output)
    }
}
