//! Deterministic stand-ins for the external collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use docanalyst::error::{ExtractionError, StorageError};
use docanalyst::extract::TextExtractor;
use docanalyst::pipeline::{CancellationFlag, Stage, StageError, StageInput, StageOutput};
use docanalyst::storage::{ArtifactStore, FileArtifactStore};

/// One scripted stage response.
#[derive(Debug, Clone)]
pub enum Step {
    Pass(&'static str),
    Fail(&'static str),
    Report(&'static str),
    Timeout,
    Unavailable,
    Rejected,
    /// Sleeps, then returns the inner step.
    Delay(Duration, Box<Step>),
    /// Blocks until the cancellation flag is raised.
    HangUntilCancelled,
}

impl Step {
    fn play(&self, cancel: &CancellationFlag) -> Result<StageOutput, StageError> {
        match self {
            Step::Pass(reasoning) => Ok(StageOutput::Verdict {
                passed: true,
                reasoning: reasoning.to_string(),
            }),
            Step::Fail(reasoning) => Ok(StageOutput::Verdict {
                passed: false,
                reasoning: reasoning.to_string(),
            }),
            Step::Report(report) => Ok(StageOutput::Report(report.to_string())),
            Step::Timeout => Err(StageError::Timeout("stage took too long".to_string())),
            Step::Unavailable => Err(StageError::Unavailable("HTTP 503".to_string())),
            Step::Rejected => Err(StageError::Rejected("HTTP 400".to_string())),
            Step::Delay(wait, next) => {
                thread::sleep(*wait);
                next.play(cancel)
            }
            Step::HangUntilCancelled => {
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(StageError::Cancelled)
            }
        }
    }
}

/// Plays back one step per call; the last step repeats.
pub struct ScriptedStage {
    script: Vec<Step>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedStage {
    pub fn new(script: Vec<Step>) -> Self {
        assert!(!script.is_empty(), "script must have at least one step");
        Self {
            script,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(vec![step])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl Stage for ScriptedStage {
    fn run(
        &self,
        input: &StageInput<'_>,
        cancel: &CancellationFlag,
    ) -> Result<StageOutput, StageError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(input.query.to_string());
        self.script[n.min(self.script.len() - 1)].play(cancel)
    }
}

/// Returns fixed text regardless of the artifact contents.
pub struct StubExtractor {
    text: Option<&'static str>,
    calls: AtomicUsize,
}

impl StubExtractor {
    pub fn text(text: &'static str) -> Self {
        Self {
            text: Some(text),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every call with a permanent parse error.
    pub fn unparsable() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextExtractor for StubExtractor {
    fn extract_text(&self, _path: &Path) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.text {
            Some(text) => Ok(text.to_string()),
            None => Err(ExtractionError::PdfParse("invalid xref table".to_string())),
        }
    }
}

/// File-backed artifact store that counts releases per path.
pub struct CountingArtifacts {
    inner: FileArtifactStore,
    staged: Mutex<Vec<PathBuf>>,
    released: Mutex<HashMap<PathBuf, usize>>,
}

impl CountingArtifacts {
    pub fn new(directory: &Path) -> Self {
        Self {
            inner: FileArtifactStore::new(directory),
            staged: Mutex::new(Vec::new()),
            released: Mutex::new(HashMap::new()),
        }
    }

    pub fn staged(&self) -> Vec<PathBuf> {
        self.staged.lock().unwrap().clone()
    }

    pub fn release_count(&self, path: &Path) -> usize {
        self.released.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_releases(&self) -> usize {
        self.released.lock().unwrap().values().sum()
    }
}

impl ArtifactStore for CountingArtifacts {
    fn stage(&self, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.inner.stage(filename, content)?;
        self.staged.lock().unwrap().push(path.clone());
        Ok(path)
    }

    fn release(&self, path: &Path) {
        *self
            .released
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_insert(0) += 1;
        self.inner.release(path);
    }
}
