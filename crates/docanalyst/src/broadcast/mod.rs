//! Broadcasting for real-time job event streaming.

pub mod job_events;

pub use job_events::{JobEvent, JobEventBroadcaster};
