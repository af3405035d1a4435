//! Test harness for isolated scheduler execution.
//!
//! The `TestHarness` struct wires a `JobScheduler` to:
//! - an in-memory SQLite job store publishing job events
//! - a counting, file-backed artifact store in a temp directory
//! - scripted verify/analyze stages and a stub extractor by default

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use docanalyst::broadcast::JobEventBroadcaster;
use docanalyst::db::Database;
use docanalyst::extract::TextExtractor;
use docanalyst::job::{Job, JobStore};
use docanalyst::pipeline::PipelineRunner;
use docanalyst::scheduler::{JobScheduler, SchedulerConfig};

use super::builders::SchedulerConfigBuilder;
use super::stubs::{CountingArtifacts, ScriptedStage, Step, StubExtractor};

pub const FINANCIAL_TEXT: &str = "ACME Corp Q3 Balance Sheet\nTotal assets 1,200\nTotal liabilities 700";

/// Minimal bytes for an upload named `*.pdf`; stub extractors never parse them.
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n% test upload\n";

pub struct TestHarness {
    pub scheduler: JobScheduler,
    pub store: JobStore,
    pub events: JobEventBroadcaster,
    pub artifacts: Arc<CountingArtifacts>,
    pub verify: Arc<ScriptedStage>,
    pub analyze: Arc<ScriptedStage>,
    pub artifact_dir: PathBuf,
    temp_dir: TempDir,
}

impl TestHarness {
    /// Verify passes, analyze returns `R1`.
    pub fn passing() -> Self {
        Self::new(
            ScriptedStage::always(Step::Pass("financial statement")),
            ScriptedStage::always(Step::Report("R1")),
        )
    }

    pub fn new(verify: ScriptedStage, analyze: ScriptedStage) -> Self {
        Self::with_config(SchedulerConfigBuilder::new().build(), verify, analyze)
    }

    pub fn with_config(config: SchedulerConfig, verify: ScriptedStage, analyze: ScriptedStage) -> Self {
        Self::build(config, Arc::new(StubExtractor::text(FINANCIAL_TEXT)), verify, analyze)
    }

    pub fn build(
        config: SchedulerConfig,
        extractor: Arc<dyn TextExtractor>,
        verify: ScriptedStage,
        analyze: ScriptedStage,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let artifact_dir = temp_dir.path().join("artifacts");

        let events = JobEventBroadcaster::new(1024);
        let db = Database::open_in_memory().expect("Failed to open database");
        let store = JobStore::with_events(db, events.clone());
        let artifacts = Arc::new(CountingArtifacts::new(&artifact_dir));
        let verify = Arc::new(verify);
        let analyze = Arc::new(analyze);

        let runner = PipelineRunner::new(extractor, verify.clone(), analyze.clone());
        let scheduler = JobScheduler::new(config, store.clone(), artifacts.clone(), runner);

        Self {
            scheduler,
            store,
            events,
            artifacts,
            verify,
            analyze,
            artifact_dir,
            temp_dir,
        }
    }

    /// Polls the store until the job is terminal.
    pub fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Job {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.store.get(job_id).expect("job must exist");
            if job.is_terminal() {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {} after {:?}",
                job_id,
                job.status,
                timeout
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Files currently present in the artifact directory.
    pub fn artifact_files(&self) -> usize {
        std::fs::read_dir(&self.artifact_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
