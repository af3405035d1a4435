//! Job records: the persisted unit of work and its store.

pub mod model;
pub mod store;

pub use model::{Job, JobStatus, WorkItem};
pub use store::{JobStore, TransitionFields};
