use tracing::{debug, error, warn};

use crate::frame::{Frame, StageStatus};

use super::stage::{StageContext, StageStep};
use super::types::{CancelToken, RunReport, RunState, StageError, StageOutcome};

/// Drives one frame through an ordered stage list.
///
/// Steps that do not apply to the frame's observation type are passed over.
/// Recoverable errors flag the frame and the run goes on; a fatal error ends
/// the run with [`RunState::Failed`]. Cancellation is checked before each
/// step.
pub struct PipelineRunner<'a> {
    steps: &'a [StageStep],
    cancel: CancelToken,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(steps: &'a [StageStep]) -> Self {
        Self {
            steps,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, mut frame: Frame, ctx: &StageContext<'_>) -> RunReport {
        let span = frame.span();
        let _guard = span.enter();

        let mut state = RunState::Pending;
        let mut errors = Vec::new();

        for (i, step) in self.steps.iter().enumerate() {
            if !step.applies_to(frame.obstype) {
                continue;
            }
            if self.cancel.is_cancelled() {
                frame.record(step.name(), StageStatus::Skipped("cancelled".into()));
                state = RunState::Skipped("cancelled".into());
                break;
            }

            state = RunState::Running(i);
            debug!(stage = step.name(), "Running stage");

            match step.apply(&mut frame, ctx) {
                Ok(StageOutcome::Continue) => {}
                Ok(StageOutcome::Stop(reason)) => {
                    debug!(stage = step.name(), reason = %reason, "Stage stopped the run");
                    state = RunState::Skipped(reason);
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(stage = step.name(), error = %e, "Stage failed, frame flagged");
                    frame.flag_bad(step.name(), e.to_string());
                    errors.push(StageError::new(step.name(), &e));
                }
                Err(e) => {
                    error!(stage = step.name(), error = %e, "Stage failed fatally");
                    frame.record(step.name(), StageStatus::Failed(e.to_string()));
                    errors.push(StageError::new(step.name(), &e));
                    state = RunState::Failed(e.to_string());
                    break;
                }
            }
        }

        if !state.is_terminal() {
            state = RunState::Completed;
        }
        RunReport {
            frame,
            state,
            errors,
        }
    }
}
