//! Job dispatch: synchronous and asynchronous submission over one
//! [`Executor`] core, plus the background runtime (workers, delayed
//! requeue, watchdog) that drives asynchronous jobs to a terminal state.

pub mod config;
pub mod delay;
pub mod executor;
pub mod policy;
pub mod pool;
pub mod watchdog;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info, warn};

use crate::broadcast::JobEventBroadcaster;
use crate::config::Config;
use crate::db::Database;
use crate::error::{AnalystError, ConfigError, StoreError, SubmitError};
use crate::extract::ExtractorRegistry;
use crate::job::{Job, JobStatus, JobStore, WorkItem};
use crate::pipeline::PipelineRunner;
use crate::reasoning::{AnalyzeStage, ChatClient, VerifyStage};
use crate::storage::{ArtifactStore, FileArtifactStore};

pub use config::SchedulerConfig;
pub use delay::{DelayHandle, DelayQueue};
pub use executor::{Execution, Executor, Reclaimed};
pub use policy::{Backoff, RetryPolicy};
pub use pool::WorkerPool;
pub use watchdog::{SweepReport, Watchdog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Run on the caller's thread until the job is terminal.
    Sync,
    /// Enqueue for the worker pool and return the `pending` job.
    Async,
}

/// Counts from startup recovery.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub enqueued: usize,
    pub reclaimed: SweepReport,
}

struct Runtime {
    queue: Sender<WorkItem>,
    delay: DelayQueue,
    pool: WorkerPool,
    watchdog: Watchdog,
}

pub struct JobScheduler {
    config: SchedulerConfig,
    store: JobStore,
    artifacts: Arc<dyn ArtifactStore>,
    executor: Arc<Executor>,
    runtime: Mutex<Option<Runtime>>,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: JobStore,
        artifacts: Arc<dyn ArtifactStore>,
        runner: PipelineRunner,
    ) -> Self {
        let executor = Arc::new(Executor::new(
            store.clone(),
            Arc::clone(&artifacts),
            runner,
            config.retry,
            config.soft_timeout,
            config.hard_timeout,
        ));

        Self {
            config,
            store,
            artifacts,
            executor,
            runtime: Mutex::new(None),
        }
    }

    /// Production wiring: SQLite store, file artifacts, the extractor
    /// registry and reasoning-service stages. Does not start the runtime.
    pub fn from_config(config: &Config) -> Result<Self, AnalystError> {
        let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and no home directory was found".to_string(),
        })?;
        let db = Database::open(&db_path)?;
        let store = JobStore::with_events(db, JobEventBroadcaster::default());

        let client = Arc::new(ChatClient::from_env(&config.reasoning)?);
        let max_chars = config.reasoning.max_document_chars;
        let runner = PipelineRunner::new(
            Arc::new(ExtractorRegistry::new()),
            Arc::new(VerifyStage::new(client.clone(), max_chars)),
            Arc::new(AnalyzeStage::new(client, max_chars)),
        );

        Ok(Self::new(
            SchedulerConfig::from_config(config),
            store,
            Arc::new(FileArtifactStore::new(&config.artifact_directory)),
            runner,
        ))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Starts workers, the delay queue and the watchdog, then recovers jobs
    /// left behind by a previous process: `pending` jobs are enqueued and
    /// `processing` jobs are reclaimed.
    pub fn start(&self) -> Result<RecoveryReport, AnalystError> {
        let mut runtime = self.lock_runtime();
        if runtime.is_some() {
            debug!("Scheduler already running");
            return Ok(RecoveryReport::default());
        }

        let pending = self.store.list_by_status(JobStatus::Pending)?;
        let orphaned = self.store.list_by_status(JobStatus::Processing)?;

        let (queue, queue_rx) = unbounded();
        let started = self
            .spawn_runtime(queue, queue_rx)
            .map_err(AnalystError::Runtime)?;

        let mut report = RecoveryReport::default();
        for job in &pending {
            if started.queue.send(job.work_item()).is_ok() {
                report.enqueued += 1;
            }
        }

        let delay = started.delay.handle();
        for job in &orphaned {
            match self.executor.reclaim(job) {
                Ok(Reclaimed::Requeued { job, delay: wait }) => {
                    delay.schedule(job.work_item(), wait);
                    report.reclaimed.requeued += 1;
                }
                Ok(Reclaimed::Failed(_)) => report.reclaimed.failed += 1,
                Err(e) if e.is_invalid_transition() => debug!("Skipped reclaim: {}", e),
                Err(e) => warn!("Failed to reclaim job {}: {}", job.id, e),
            }
        }

        *runtime = Some(started);
        info!(
            "Scheduler started: {} pending job(s) enqueued, {} requeued, {} failed during recovery",
            report.enqueued, report.reclaimed.requeued, report.reclaimed.failed
        );
        Ok(report)
    }

    fn spawn_runtime(
        &self,
        queue: Sender<WorkItem>,
        queue_rx: crossbeam_channel::Receiver<WorkItem>,
    ) -> std::io::Result<Runtime> {
        let delay = DelayQueue::start(queue.clone())?;
        let pool = WorkerPool::start(
            Arc::clone(&self.executor),
            queue_rx,
            delay.handle(),
            self.config.worker_count,
        )?;
        let watchdog = Watchdog::start(
            Arc::clone(&self.executor),
            delay.handle(),
            self.config.watchdog_interval,
            self.config.stale_after(),
        )?;

        Ok(Runtime {
            queue,
            delay,
            pool,
            watchdog,
        })
    }

    pub fn is_running(&self) -> bool {
        self.lock_runtime().is_some()
    }

    /// Validates the upload, stages it, creates the job and runs it
    /// according to `mode`.
    ///
    /// Input errors are rejected before a job exists. In sync mode the
    /// returned job is terminal; in async mode it is `pending`. An async
    /// submission that finds no running work queue is processed inline
    /// instead, and the returned job is terminal.
    pub fn submit(
        &self,
        filename: &str,
        bytes: &[u8],
        query: &str,
        mode: SubmitMode,
    ) -> Result<Job, SubmitError> {
        let query = self.validate_input(filename, bytes, query)?;

        let artifact_path = self.artifacts.stage(filename, bytes)?;
        let job = match self.store.create(filename, &query, &artifact_path) {
            Ok(job) => job,
            Err(e) => {
                self.artifacts.release(&artifact_path);
                return Err(e.into());
            }
        };
        info!(job_id = %job.id, mode = ?mode, "Job submitted");

        match mode {
            SubmitMode::Async if self.enqueue(&job) => Ok(job),
            SubmitMode::Async => {
                warn!(job_id = %job.id, "Work queue unavailable, processing synchronously");
                Ok(self.run_inline(&job.id)?)
            }
            SubmitMode::Sync => Ok(self.run_inline(&job.id)?),
        }
    }

    /// Executes a job on the calling thread, sleeping through backoff
    /// delays, until it is terminal.
    fn run_inline(&self, job_id: &str) -> Result<Job, StoreError> {
        loop {
            match self.executor.execute(job_id)? {
                Execution::Completed(job) => return Ok(job),
                Execution::Requeued { delay, .. } => thread::sleep(delay),
            }
        }
    }

    fn enqueue(&self, job: &Job) -> bool {
        self.lock_runtime()
            .as_ref()
            .is_some_and(|runtime| runtime.queue.send(job.work_item()).is_ok())
    }

    fn validate_input(&self, filename: &str, bytes: &[u8], query: &str) -> Result<String, SubmitError> {
        if filename.trim().is_empty() {
            return Err(SubmitError::InvalidInput("file name is empty".to_string()));
        }
        if bytes.is_empty() {
            return Err(SubmitError::InvalidInput("uploaded file is empty".to_string()));
        }

        let mime = mime_guess::from_path(filename)
            .first()
            .ok_or_else(|| {
                SubmitError::InvalidInput(format!("cannot determine file type of '{}'", filename))
            })?;
        if !self
            .config
            .accepted_mime_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(mime.essence_str()))
        {
            return Err(SubmitError::InvalidInput(format!(
                "unsupported file type '{}'",
                mime.essence_str()
            )));
        }

        let query = query.trim();
        Ok(if query.is_empty() {
            self.config.default_query.clone()
        } else {
            query.to_string()
        })
    }

    pub fn get_status(&self, job_id: &str) -> Result<Job, StoreError> {
        self.store.get(job_id)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.store.list(limit)
    }

    /// Stops the watchdog, the workers and the delay queue. Workers finish
    /// the item they are running; queued items stay `pending` in the store.
    pub fn shutdown(&self) {
        let Some(runtime) = self.lock_runtime().take() else {
            return;
        };

        info!("Shutting down scheduler...");
        let Runtime {
            queue,
            delay,
            pool,
            watchdog,
        } = runtime;

        watchdog.stop();
        pool.shutdown();
        drop(queue);
        pool.wait();
        delay.shutdown();
        info!("Scheduler stopped");
    }

    fn lock_runtime(&self) -> MutexGuard<'_, Option<Runtime>> {
        // Only handles live behind this lock.
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
