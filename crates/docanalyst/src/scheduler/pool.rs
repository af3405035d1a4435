use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use crate::job::WorkItem;

use super::delay::DelayHandle;
use super::executor::{Execution, Executor};

/// Fixed set of worker threads pulling work items from a shared queue.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers reading from `queue`. Requeued jobs go
    /// back through `delay`.
    pub fn start(
        executor: Arc<Executor>,
        queue: Receiver<WorkItem>,
        delay: DelayHandle,
        worker_count: usize,
    ) -> std::io::Result<Self> {
        let worker_count = worker_count.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let queue = queue.clone();
            let executor = Arc::clone(&executor);
            let delay = delay.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, queue, executor, delay, shutdown_flag))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self { workers, shutdown })
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for every worker to finish its current item and exit.
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    queue: Receiver<WorkItem>,
    executor: Arc<Executor>,
    delay: DelayHandle,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match queue.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => process_item(worker_id, &item, &executor, &delay),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn process_item(worker_id: usize, item: &WorkItem, executor: &Executor, delay: &DelayHandle) {
    debug!("Worker {} picked up job {}", worker_id, item.job_id);

    match executor.execute(&item.job_id) {
        Ok(Execution::Completed(job)) => {
            debug!("Worker {} finished job {} as {}", worker_id, job.id, job.status);
        }
        Ok(Execution::Requeued { job, delay: wait }) => {
            if !delay.schedule(job.work_item(), wait) {
                warn!(
                    "Delay queue stopped, job {} stays pending until next start",
                    job.id
                );
            }
        }
        Err(e) if e.is_invalid_transition() => {
            // Duplicate delivery, or a job that is already terminal.
            debug!("Worker {} skipped job {}: {}", worker_id, item.job_id, e);
        }
        Err(e) => {
            error!("Worker {} failed to execute job {}: {}", worker_id, item.job_id, e);
        }
    }
}
