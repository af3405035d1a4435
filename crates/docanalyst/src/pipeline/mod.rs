pub mod error;
pub mod progress;
pub mod runner;
pub mod stage;

pub use error::{PipelineFailure, StageError};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{PipelineResult, PipelineRunner};
pub use stage::{CancellationFlag, PipelineStep, Stage, StageInput, StageOutput};
