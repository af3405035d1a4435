pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod job;
pub mod pipeline;
pub mod reasoning;
pub mod sanitize;
pub mod scheduler;
pub mod storage;
pub mod telemetry;

pub use broadcast::{JobEvent, JobEventBroadcaster};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    AnalystError, ConfigError, ExtractionError, Result, StorageError, StoreError, SubmitError,
};
pub use extract::{ExtractorRegistry, TextExtractor};
pub use job::{Job, JobStatus, JobStore, TransitionFields, WorkItem};
pub use pipeline::{
    CancellationFlag, PipelineFailure, PipelineResult, PipelineRunner, Stage, StageError,
    StageInput, StageOutput,
};
pub use scheduler::{Execution, Executor, JobScheduler, SchedulerConfig, SubmitMode};
pub use storage::{ArtifactStore, FileArtifactStore};
pub use telemetry::init_tracing;
