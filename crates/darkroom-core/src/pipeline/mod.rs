pub mod config;
pub mod orchestrator;
pub mod runner;
pub mod stage;
pub mod types;

pub use config::ReductionConfig;
pub use orchestrator::{is_fits_name, BatchSummary, MasterCriteria, Orchestrator};
pub use runner::PipelineRunner;
pub use stage::{StageContext, StageStep};
pub use types::{
    CancelToken, FileOutcome, NoOpReporter, PipelineStage, ProgressReporter, RunReport, RunState,
    StageError, StageOutcome,
};
