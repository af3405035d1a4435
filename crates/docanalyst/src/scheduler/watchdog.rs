//! Periodic reclaim of jobs stuck in `processing`.
//!
//! A job stays `processing` past its hard timeout only if its executor died
//! or lost contact with the store. The watchdog forces such jobs back to
//! `pending` or on to `failed` through the same conditional transition every
//! other writer uses, so a late result from the original executor is
//! rejected instead of overwriting the outcome.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, error, info, warn};

use crate::error::StoreError;

use super::delay::DelayHandle;
use super::executor::{Executor, Reclaimed};

/// Counts from one reclaim sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
}

/// Reclaims every `processing` job claimed more than `stale_after` ago.
pub fn sweep(
    executor: &Executor,
    delay: &DelayHandle,
    stale_after: Duration,
) -> Result<SweepReport, StoreError> {
    let stale_after = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(stale_after)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    let stale = executor.store().list_stale_processing(cutoff)?;

    let mut report = SweepReport::default();
    for job in stale {
        match executor.reclaim(&job) {
            Ok(Reclaimed::Requeued { job, delay: wait }) => {
                report.requeued += 1;
                if !delay.schedule(job.work_item(), wait) {
                    warn!("Delay queue stopped, job {} stays pending", job.id);
                }
            }
            Ok(Reclaimed::Failed(_)) => report.failed += 1,
            // The executor reported back between the query and the reclaim.
            Err(e) if e.is_invalid_transition() => debug!("Skipped reclaim: {}", e),
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

pub struct Watchdog {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn start(
        executor: Arc<Executor>,
        delay: DelayHandle,
        interval: Duration,
        stale_after: Duration,
    ) -> std::io::Result<Self> {
        let (stop, stop_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                info!(
                    "Watchdog started (interval {}s, stale after {}s)",
                    interval.as_secs(),
                    stale_after.as_secs()
                );
                loop {
                    select! {
                        recv(ticker) -> _ => match sweep(&executor, &delay, stale_after) {
                            Ok(report) if report.requeued + report.failed > 0 => info!(
                                "Watchdog reclaimed {} job(s): {} requeued, {} failed",
                                report.requeued + report.failed,
                                report.requeued,
                                report.failed
                            ),
                            Ok(_) => {}
                            Err(e) => error!("Watchdog sweep failed: {}", e),
                        },
                        recv(stop_rx) -> _ => break,
                    }
                }
                debug!("Watchdog stopped");
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                error!("Watchdog thread panicked: {:?}", e);
            }
        }
    }
}
