use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use super::{build_orchestrator, GlobalArgs, ProcessingArgs};
use crate::progress::BarReporter;
use crate::summary::{print_batch_summary, print_run_summary};

#[derive(Args)]
pub struct ReduceDirArgs {
    /// Directory of raw FITS frames
    pub dir: PathBuf,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

pub fn run(args: &ReduceDirArgs, global: &GlobalArgs) -> Result<()> {
    let orchestrator = build_orchestrator(global, &args.processing, |_| {})?;
    print_run_summary(orchestrator.config(), &global.db);

    let reporter = BarReporter::new()?;
    let summary = orchestrator
        .reduce_directory(&args.dir, &reporter)
        .with_context(|| format!("Failed to reduce {}", args.dir.display()))?;

    print_batch_summary(&summary);
    if summary.failed() > 0 {
        bail!("{} of {} file(s) failed", summary.failed(), summary.outcomes.len());
    }
    Ok(())
}
