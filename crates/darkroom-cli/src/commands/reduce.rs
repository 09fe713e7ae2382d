use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use darkroom_core::frame::StageStatus;
use darkroom_core::io::{read_header, stage_statuses};
use darkroom_core::pipeline::FileOutcome;

use super::{build_orchestrator, GlobalArgs, ProcessingArgs};
use crate::summary::print_run_summary;

#[derive(Args)]
pub struct ReduceArgs {
    /// Raw FITS frame
    pub file: PathBuf,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

pub fn run(args: &ReduceArgs, global: &GlobalArgs) -> Result<()> {
    let orchestrator = build_orchestrator(global, &args.processing, |_| {})?;
    print_run_summary(orchestrator.config(), &global.db);

    let outcome = orchestrator
        .reduce_file(&args.file)
        .with_context(|| format!("Failed to reduce {}", args.file.display()))?;

    match outcome {
        FileOutcome::Reduced { output, is_bad } => {
            println!("Reduced {} -> {}", args.file.display(), output.display());
            if is_bad {
                println!("Frame was flagged bad:");
                let header = read_header(&output)
                    .with_context(|| format!("Failed to read back {}", output.display()))?;
                for (stage, status) in stage_statuses(&header) {
                    if !matches!(status, StageStatus::Ok) {
                        println!("  {}", status.encode(&stage));
                    }
                }
            }
            Ok(())
        }
        FileOutcome::Skipped => {
            println!("{} does not need processing", args.file.display());
            Ok(())
        }
        FileOutcome::Failed(reason) => bail!("Reduction of {} failed: {reason}", args.file.display()),
    }
}
