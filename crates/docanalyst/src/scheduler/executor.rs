//! One execution attempt of one job.
//!
//! [`Executor::execute`] is shared by the synchronous and asynchronous
//! submission paths. It claims the job, runs the pipeline under the soft and
//! hard timeouts, classifies the outcome and commits the next state. The
//! artifact is released only by whoever commits a terminal state, so it is
//! released exactly once per job and never on a requeue.
//!
//! Every write out of `processing` is fenced to the attempt the writer
//! observed. A writer holding an older snapshot (a late executor, or a
//! watchdog sweep racing a fresh claim) gets `InvalidTransition` and leaves
//! the newer attempt alone.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, info_span, warn};

use crate::error::StoreError;
use crate::job::{Job, JobStatus, JobStore, TransitionFields};
use crate::pipeline::{
    BroadcastProgress, CancellationFlag, NoopProgress, PipelineFailure, PipelineResult,
    PipelineRunner, ProgressReporter,
};
use crate::storage::ArtifactStore;

use super::policy::RetryPolicy;

/// Outcome of one [`Executor::execute`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// The job reached `success` or `failed`.
    Completed(Job),
    /// The attempt failed with a retryable error and the job is `pending`
    /// again; the next attempt should start after `delay`.
    Requeued { job: Job, delay: Duration },
}

/// Outcome of reclaiming an abandoned `processing` job.
#[derive(Debug, Clone, PartialEq)]
pub enum Reclaimed {
    Requeued { job: Job, delay: Duration },
    Failed(Job),
}

pub struct Executor {
    store: JobStore,
    artifacts: Arc<dyn ArtifactStore>,
    runner: PipelineRunner,
    policy: RetryPolicy,
    soft_timeout: Duration,
    hard_timeout: Duration,
}

impl Executor {
    pub fn new(
        store: JobStore,
        artifacts: Arc<dyn ArtifactStore>,
        runner: PipelineRunner,
        policy: RetryPolicy,
        soft_timeout: Duration,
        hard_timeout: Duration,
    ) -> Self {
        Self {
            store,
            artifacts,
            runner,
            policy,
            soft_timeout,
            hard_timeout: hard_timeout.max(soft_timeout),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one attempt of `job_id`.
    ///
    /// Fails with [`StoreError::InvalidTransition`] if the job is not
    /// `pending` (another executor owns it, or it is already terminal).
    /// Pipeline failures never surface here; they are recorded on the job.
    pub fn execute(&self, job_id: &str) -> Result<Execution, StoreError> {
        let job = self.store.transition(
            job_id,
            &[JobStatus::Pending],
            JobStatus::Processing,
            TransitionFields::claim(),
        )?;

        let span = info_span!("job", job_id = %job.id, attempt = job.attempt_count);
        let _entered = span.enter();
        info!("Attempt {} started", job.attempt_count);

        match self.run_with_timeout(&job) {
            Ok(result) => {
                let job = self.finish(
                    &job,
                    JobStatus::Success,
                    TransitionFields::report(result.report),
                )?;
                info!("Job completed");
                Ok(Execution::Completed(job))
            }
            Err(failure) if failure.is_retryable() && self.policy.should_retry(job.attempt_count) => {
                let delay = self.policy.delay_for(job.attempt_count);
                warn!(
                    "Attempt {} failed, retrying in {:?}: {}",
                    job.attempt_count, delay, failure
                );
                let job = self.store.transition(
                    &job.id,
                    &[JobStatus::Processing],
                    JobStatus::Pending,
                    TransitionFields::none().at_attempt(job.attempt_count),
                )?;
                Ok(Execution::Requeued { job, delay })
            }
            Err(failure) => {
                warn!(
                    retryable = failure.is_retryable(),
                    "Job failed after {} attempt(s): {}", job.attempt_count, failure
                );
                let job = self.finish(
                    &job,
                    JobStatus::Failed,
                    TransitionFields::error(failure.to_string()),
                )?;
                Ok(Execution::Completed(job))
            }
        }
    }

    /// Forces an abandoned `processing` job back to `pending`, or to
    /// `failed` once its attempts are used up.
    ///
    /// `job` is the snapshot the caller found stale. If the job has moved on
    /// to a later attempt since, this fails with `InvalidTransition`.
    pub fn reclaim(&self, job: &Job) -> Result<Reclaimed, StoreError> {
        let stuck_for = job
            .claimed_at
            .map(|claimed| (Utc::now() - claimed).num_seconds().max(0))
            .unwrap_or_default();

        if self.policy.should_retry(job.attempt_count) {
            let job = self.store.transition(
                &job.id,
                &[JobStatus::Processing],
                JobStatus::Pending,
                TransitionFields::none().at_attempt(job.attempt_count),
            )?;
            warn!(job_id = %job.id, "Reclaimed job stuck in processing for {}s", stuck_for);
            let delay = self.policy.delay_for(job.attempt_count);
            Ok(Reclaimed::Requeued { job, delay })
        } else {
            let error = format!(
                "Attempt {} did not report back within the hard timeout of {}s",
                job.attempt_count,
                self.hard_timeout.as_secs()
            );
            let job = self.finish(job, JobStatus::Failed, TransitionFields::error(error))?;
            warn!(job_id = %job.id, "Failed job stuck in processing for {}s", stuck_for);
            Ok(Reclaimed::Failed(job))
        }
    }

    /// Commits a terminal state for the attempt in `job` and releases the
    /// artifact.
    fn finish(
        &self,
        job: &Job,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, StoreError> {
        let committed = self.store.transition(
            &job.id,
            &[JobStatus::Processing],
            to,
            fields.at_attempt(job.attempt_count),
        )?;
        self.artifacts.release(&committed.artifact_path);
        Ok(committed)
    }

    fn progress_for(&self, job: &Job) -> Box<dyn ProgressReporter> {
        match self.store.events() {
            Some(events) => Box::new(BroadcastProgress::new(
                &job.id,
                job.attempt_count,
                events.clone(),
            )),
            None => Box::new(NoopProgress),
        }
    }

    /// Runs the pipeline on a helper thread and waits for it.
    ///
    /// At the soft timeout the cancellation flag is raised. At the hard
    /// timeout the attempt is abandoned and counted as timed out; the helper
    /// thread is detached and its eventual result discarded.
    ///
    /// A detached thread cannot be stopped. Because the flag is already
    /// raised it starts no further stage, so it outlives the attempt by at
    /// most the one request in flight, bounded by the reasoning client's
    /// request timeout. It never writes to the store.
    fn run_with_timeout(&self, job: &Job) -> Result<PipelineResult, PipelineFailure> {
        let cancel = CancellationFlag::new();
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);

        let runner = self.runner.clone();
        let item = job.work_item();
        let flag = cancel.clone();
        let progress = self.progress_for(job);
        let span = tracing::Span::current();

        thread::Builder::new()
            .name(format!("pipeline-{}", short_id(&job.id)))
            .spawn(move || {
                let _entered = span.enter();
                let result = runner.run(&item.query, &item.artifact_path, &flag, progress.as_ref());
                // The receiver is gone if the attempt was abandoned.
                let _ = result_tx.send(result);
            })
            .map_err(PipelineFailure::Spawn)?;

        match result_rx.recv_timeout(self.soft_timeout) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Disconnected) => return Err(PipelineFailure::Panicked),
            Err(RecvTimeoutError::Timeout) => {}
        }

        warn!(
            "Soft timeout of {}s reached, cancelling pipeline",
            self.soft_timeout.as_secs()
        );
        cancel.cancel();

        let remaining = self.hard_timeout.saturating_sub(self.soft_timeout);
        match result_rx.recv_timeout(remaining) {
            Ok(Err(PipelineFailure::Cancelled { step })) => {
                debug!("Pipeline stopped before {}", step);
                Err(PipelineFailure::TimedOut {
                    after: self.soft_timeout,
                })
            }
            Ok(result) => result,
            Err(RecvTimeoutError::Disconnected) => Err(PipelineFailure::Panicked),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Hard timeout of {}s reached, abandoning attempt",
                    self.hard_timeout.as_secs()
                );
                Err(PipelineFailure::TimedOut {
                    after: self.hard_timeout,
                })
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::{ExtractionError, StorageError};
    use crate::extract::TextExtractor;
    use crate::pipeline::{Stage, StageError, StageInput, StageOutput};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticText;

    impl TextExtractor for StaticText {
        fn extract_text(&self, _path: &Path) -> Result<String, ExtractionError> {
            Ok("Balance sheet: assets 100".to_string())
        }
    }

    struct Pass;

    impl Stage for Pass {
        fn run(&self, _: &StageInput<'_>, _: &CancellationFlag) -> Result<StageOutput, StageError> {
            Ok(StageOutput::Verdict {
                passed: true,
                reasoning: "ok".to_string(),
            })
        }
    }

    /// Plays back one scripted result per call, repeating the last one.
    struct Scripted {
        script: Vec<fn() -> Result<StageOutput, StageError>>,
        calls: AtomicUsize,
    }

    impl Stage for Scripted {
        fn run(&self, _: &StageInput<'_>, _: &CancellationFlag) -> Result<StageOutput, StageError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script[n.min(self.script.len() - 1)];
            step()
        }
    }

    /// Sleeps until cancelled, then reports cancellation.
    struct Cooperative;

    impl Stage for Cooperative {
        fn run(&self, _: &StageInput<'_>, cancel: &CancellationFlag) -> Result<StageOutput, StageError> {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Err(StageError::Cancelled)
        }
    }

    /// Ignores cancellation entirely.
    struct Stubborn;

    impl Stage for Stubborn {
        fn run(&self, _: &StageInput<'_>, _: &CancellationFlag) -> Result<StageOutput, StageError> {
            thread::sleep(Duration::from_millis(500));
            Ok(StageOutput::Report("too late".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingArtifacts {
        released: Mutex<Vec<PathBuf>>,
    }

    impl ArtifactStore for RecordingArtifacts {
        fn stage(&self, filename: &str, _content: &[u8]) -> Result<PathBuf, StorageError> {
            Ok(PathBuf::from("/staged").join(filename))
        }

        fn release(&self, path: &Path) {
            self.released.lock().unwrap().push(path.to_path_buf());
        }
    }

    fn report() -> Result<StageOutput, StageError> {
        Ok(StageOutput::Report("R1".to_string()))
    }

    fn unavailable() -> Result<StageOutput, StageError> {
        Err(StageError::Unavailable("HTTP 503".to_string()))
    }

    fn rejected() -> Result<StageOutput, StageError> {
        Err(StageError::Rejected("HTTP 400".to_string()))
    }

    fn scripted(script: Vec<fn() -> Result<StageOutput, StageError>>) -> Arc<dyn Stage> {
        Arc::new(Scripted {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn setup(
        analyze: Arc<dyn Stage>,
        soft: Duration,
        hard: Duration,
    ) -> (Executor, Arc<RecordingArtifacts>, Job) {
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let artifacts = Arc::new(RecordingArtifacts::default());
        let runner = PipelineRunner::new(Arc::new(StaticText), Arc::new(Pass), analyze);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: super::super::policy::Backoff::Fixed(Duration::from_millis(1)),
        };
        let job = store
            .create("q3.pdf", "Summarize", Path::new("/staged/q3.pdf"))
            .unwrap();
        let executor = Executor::new(store, artifacts.clone(), runner, policy, soft, hard);
        (executor, artifacts, job)
    }

    fn long() -> Duration {
        Duration::from_secs(10)
    }

    #[test]
    fn test_success_releases_artifact_once() {
        let (executor, artifacts, job) = setup(scripted(vec![report]), long(), long());

        let job = match executor.execute(&job.id).unwrap() {
            Execution::Completed(job) => job,
            other => panic!("Expected completion, got {:?}", other),
        };
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.report.as_deref(), Some("R1"));
        assert_eq!(job.attempt_count, 1);
        assert!(job.completed_at.is_some());
        assert_eq!(
            *artifacts.released.lock().unwrap(),
            vec![PathBuf::from("/staged/q3.pdf")]
        );
    }

    #[test]
    fn test_retryable_failure_requeues_without_release() {
        let (executor, artifacts, job) = setup(scripted(vec![unavailable]), long(), long());

        match executor.execute(&job.id).unwrap() {
            Execution::Requeued { job, delay } => {
                assert_eq!(job.status, JobStatus::Pending);
                assert_eq!(job.attempt_count, 1);
                assert_eq!(delay, Duration::from_millis(1));
                assert!(job.check_invariants().is_ok());
            }
            other => panic!("Expected requeue, got {:?}", other),
        }
        assert!(artifacts.released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_retry_bound_reaches_failed() {
        let (executor, artifacts, job) = setup(scripted(vec![unavailable]), long(), long());

        assert!(matches!(executor.execute(&job.id).unwrap(), Execution::Requeued { .. }));
        assert!(matches!(executor.execute(&job.id).unwrap(), Execution::Requeued { .. }));
        let job = match executor.execute(&job.id).unwrap() {
            Execution::Completed(job) => job,
            other => panic!("Expected completion, got {:?}", other),
        };

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 3);
        assert!(job.error.unwrap().contains("HTTP 503"));
        assert_eq!(artifacts.released.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let (executor, artifacts, job) = setup(scripted(vec![rejected]), long(), long());

        let job = match executor.execute(&job.id).unwrap() {
            Execution::Completed(job) => job,
            other => panic!("Expected completion, got {:?}", other),
        };
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(artifacts.released.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_execute_on_terminal_job_is_invalid_transition() {
        let (executor, artifacts, job) = setup(scripted(vec![report]), long(), long());
        executor.execute(&job.id).unwrap();

        let err = executor.execute(&job.id).unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(artifacts.released.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_soft_timeout_cancels_cooperative_stage() {
        let (executor, _artifacts, job) = setup(
            Arc::new(Cooperative),
            Duration::from_millis(50),
            Duration::from_secs(5),
        );

        match executor.execute(&job.id).unwrap() {
            Execution::Requeued { job, .. } => assert_eq!(job.status, JobStatus::Pending),
            other => panic!("Expected requeue, got {:?}", other),
        }
    }

    #[test]
    fn test_hard_timeout_abandons_stubborn_stage() {
        let (executor, _artifacts, job) = setup(
            Arc::new(Stubborn),
            Duration::from_millis(20),
            Duration::from_millis(60),
        );

        let started = std::time::Instant::now();
        let outcome = executor.execute(&job.id).unwrap();
        assert!(started.elapsed() < Duration::from_millis(450));
        assert!(matches!(outcome, Execution::Requeued { .. }));
    }

    #[test]
    fn test_reclaim_requeues_then_fails() {
        let (executor, artifacts, job) = setup(scripted(vec![report]), long(), long());
        let store = executor.store().clone();

        let claimed = store
            .transition(&job.id, &[JobStatus::Pending], JobStatus::Processing, TransitionFields::claim())
            .unwrap();
        match executor.reclaim(&claimed).unwrap() {
            Reclaimed::Requeued { job, .. } => assert_eq!(job.status, JobStatus::Pending),
            other => panic!("Expected requeue, got {:?}", other),
        }
        assert!(artifacts.released.lock().unwrap().is_empty());

        let mut last = claimed;
        for _ in 0..2 {
            last = store
                .transition(&job.id, &[JobStatus::Pending], JobStatus::Processing, TransitionFields::claim())
                .unwrap();
            if last.attempt_count < 3 {
                executor.reclaim(&last).unwrap();
            }
        }
        assert_eq!(last.attempt_count, 3);
        match executor.reclaim(&last).unwrap() {
            Reclaimed::Failed(job) => {
                assert_eq!(job.status, JobStatus::Failed);
                assert!(job.error.unwrap().contains("hard timeout"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(artifacts.released.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_late_result_after_reclaim_does_not_release_twice() {
        let (executor, artifacts, job) = setup(scripted(vec![report]), long(), long());
        let store = executor.store().clone();

        let claimed = store
            .transition(&job.id, &[JobStatus::Pending], JobStatus::Processing, TransitionFields::claim())
            .unwrap();
        let forced = store
            .transition(
                &job.id,
                &[JobStatus::Processing],
                JobStatus::Failed,
                TransitionFields::error("forced"),
            )
            .unwrap();
        assert_eq!(forced.status, JobStatus::Failed);

        let err = executor
            .finish(&claimed, JobStatus::Success, TransitionFields::report("late"))
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert!(artifacts.released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reclaim_from_stale_snapshot_leaves_newer_attempt_running() {
        let (executor, artifacts, job) = setup(scripted(vec![report]), long(), long());
        let store = executor.store().clone();
        let claim = || {
            store
                .transition(&job.id, &[JobStatus::Pending], JobStatus::Processing, TransitionFields::claim())
                .unwrap()
        };

        let snapshot = claim();
        store
            .transition(
                &job.id,
                &[JobStatus::Processing],
                JobStatus::Pending,
                TransitionFields::none().at_attempt(snapshot.attempt_count),
            )
            .unwrap();
        let live = claim();
        assert_eq!(live.attempt_count, 2);

        let err = executor.reclaim(&snapshot).unwrap_err();
        assert!(err.is_invalid_transition());

        let current = store.get(&job.id).unwrap();
        assert_eq!(current.status, JobStatus::Processing);
        assert_eq!(current.attempt_count, 2);
        assert!(executor.execute(&job.id).unwrap_err().is_invalid_transition());
        assert!(artifacts.released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_late_terminal_write_cannot_finish_newer_attempt() {
        let (executor, artifacts, job) = setup(scripted(vec![report]), long(), long());
        let store = executor.store().clone();

        let first = store
            .transition(&job.id, &[JobStatus::Pending], JobStatus::Processing, TransitionFields::claim())
            .unwrap();
        executor.reclaim(&first).unwrap();
        store
            .transition(&job.id, &[JobStatus::Pending], JobStatus::Processing, TransitionFields::claim())
            .unwrap();

        let err = executor
            .finish(&first, JobStatus::Success, TransitionFields::report("late"))
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Processing);
        assert!(artifacts.released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_abandoned_attempt_starts_no_further_stage() {
        struct SlowPass;

        impl Stage for SlowPass {
            fn run(&self, _: &StageInput<'_>, _: &CancellationFlag) -> Result<StageOutput, StageError> {
                thread::sleep(Duration::from_millis(150));
                Ok(StageOutput::Verdict {
                    passed: true,
                    reasoning: "ok".to_string(),
                })
            }
        }

        let analyze = Arc::new(Scripted {
            script: vec![report],
            calls: AtomicUsize::new(0),
        });
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let job = store
            .create("q3.pdf", "Summarize", Path::new("/staged/q3.pdf"))
            .unwrap();
        let runner = PipelineRunner::new(Arc::new(StaticText), Arc::new(SlowPass), analyze.clone());
        let executor = Executor::new(
            store,
            Arc::new(RecordingArtifacts::default()),
            runner,
            RetryPolicy::default(),
            Duration::from_millis(20),
            Duration::from_millis(40),
        );

        assert!(matches!(executor.execute(&job.id).unwrap(), Execution::Requeued { .. }));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(analyze.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
