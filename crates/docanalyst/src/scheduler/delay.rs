//! Delayed re-delivery of work items.
//!
//! A timer thread keeps a min-heap of due times and forwards each item to
//! the work queue once it is due.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};

use crate::job::WorkItem;

/// Delays past this are clamped when the exact due time is not representable.
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

enum Command {
    Schedule { due: Instant, item: WorkItem },
    Stop,
}

struct Entry {
    due: Instant,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap and the earliest entry must be on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cloneable handle for scheduling delayed deliveries.
#[derive(Clone)]
pub struct DelayHandle {
    commands: Sender<Command>,
}

impl DelayHandle {
    /// Delivers `item` to the work queue after `delay`.
    /// Returns false if the delay queue has stopped.
    pub fn schedule(&self, item: WorkItem, delay: Duration) -> bool {
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .or_else(|| now.checked_add(MAX_DELAY))
            .unwrap_or(now);
        self.commands.send(Command::Schedule { due, item }).is_ok()
    }
}

pub struct DelayQueue {
    handle: DelayHandle,
    thread: Option<JoinHandle<()>>,
}

impl DelayQueue {
    pub fn start(target: Sender<WorkItem>) -> std::io::Result<Self> {
        let (commands, receiver) = unbounded();
        let thread = thread::Builder::new()
            .name("delay-queue".to_string())
            .spawn(move || run_timer(receiver, target))?;

        Ok(Self {
            handle: DelayHandle { commands },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> DelayHandle {
        self.handle.clone()
    }

    /// Stops the timer thread. Items not yet due are dropped; their jobs stay
    /// `pending` in the store and are picked up by startup recovery.
    pub fn shutdown(mut self) {
        let _ = self.handle.commands.send(Command::Stop);
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                error!("Delay queue thread panicked: {:?}", e);
            }
        }
    }
}

fn run_timer(commands: Receiver<Command>, target: Sender<WorkItem>) {
    debug!("Delay queue started");
    let mut heap: BinaryHeap<Entry> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let next = match heap.peek() {
            Some(entry) => {
                let wait = entry.due.saturating_duration_since(Instant::now());
                commands.recv_timeout(wait)
            }
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok(Command::Schedule { due, item }) => {
                heap.push(Entry { due, seq, item });
                seq += 1;
            }
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|entry| entry.due <= now) {
            let Some(entry) = heap.pop() else { break };
            debug!("Delivering delayed job {}", entry.item.job_id);
            if target.send(entry.item).is_err() {
                debug!("Work queue closed, stopping delay queue");
                return;
            }
        }
    }

    if !heap.is_empty() {
        debug!("Delay queue stopped with {} undelivered item(s)", heap.len());
    }
}
