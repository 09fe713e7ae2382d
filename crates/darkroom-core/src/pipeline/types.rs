use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ErrorClass, ReductionError};
use crate::frame::Frame;

/// Batch-level processing phase, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Gating,
    Reducing,
    Grouping,
    Combining,
    Writing,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gating => write!(f, "Checking files"),
            Self::Reducing => write!(f, "Reducing frames"),
            Self::Grouping => write!(f, "Grouping frames"),
            Self::Combining => write!(f, "Combining masters"),
            Self::Writing => write!(f, "Writing output"),
        }
    }
}

/// Thread-safe progress reporting for batch runs.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new phase has started. `total_items` is the number of work items in
    /// this phase (e.g., frame count), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// One work item within the current phase has completed.
    fn advance(&self, _items_done: usize) {}

    /// The current phase is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// What a stage tells the runner after it has worked on a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutcome {
    Continue,
    /// Later stages must not run; the frame is kept as is.
    Stop(String),
}

/// Where a frame's run ended up.
#[derive(Clone, Debug, PartialEq)]
pub enum RunState {
    Pending,
    Running(usize),
    /// Stopped early by a stage or by cancellation.
    Skipped(String),
    /// Aborted by a fatal error.
    Failed(String),
    Completed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running(_))
    }
}

/// An error a stage raised and the runner recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct StageError {
    pub stage: String,
    pub class: ErrorClass,
    pub message: String,
}

impl StageError {
    pub fn new(stage: &str, err: &ReductionError) -> Self {
        Self {
            stage: stage.to_string(),
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// Result of running a frame through its stage list.
#[derive(Debug)]
pub struct RunReport {
    pub frame: Frame,
    pub state: RunState,
    pub errors: Vec<StageError>,
}

impl RunReport {
    /// Failures worth retrying: fatal aborts and transient errors. A frame
    /// flagged for data problems has still been processed.
    pub fn needs_retry(&self) -> bool {
        matches!(self.state, RunState::Failed(_))
            || self.errors.iter().any(|e| e.class == ErrorClass::Transient)
    }
}

/// Outcome of one file in a batch.
#[derive(Debug)]
pub enum FileOutcome {
    /// Reduced and written to `output`.
    Reduced { output: PathBuf, is_bad: bool },
    /// Not admitted by the gate.
    Skipped,
    /// Processing failed; the tracker's try count was incremented.
    Failed(String),
}

/// Cooperative cancellation flag checked between frames and between stages.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
