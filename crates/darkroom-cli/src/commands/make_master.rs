use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use darkroom_core::calibration::CalibrationType;
use darkroom_core::pipeline::MasterCriteria;

use super::{build_orchestrator, parse_date, GlobalArgs, ProcessingArgs};
use crate::progress::BarReporter;

#[derive(Clone, Copy, ValueEnum)]
pub enum CalTypeArg {
    Bias,
    Dark,
    Flat,
}

impl From<CalTypeArg> for CalibrationType {
    fn from(arg: CalTypeArg) -> Self {
        match arg {
            CalTypeArg::Bias => CalibrationType::Bias,
            CalTypeArg::Dark => CalibrationType::Dark,
            CalTypeArg::Flat => CalibrationType::Flat,
        }
    }
}

#[derive(Args)]
pub struct MakeMasterArgs {
    /// Directory of raw calibration frames
    pub dir: PathBuf,

    /// Calibration type
    #[arg(long = "type", value_enum)]
    pub cal_type: CalTypeArg,

    /// Site code, e.g. lsc
    #[arg(long)]
    pub site: String,

    /// Camera name, e.g. fa15
    #[arg(long)]
    pub camera: String,

    /// First observing night (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start: NaiveDate,

    /// Last observing night (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end: NaiveDate,

    /// Accept frames when no earlier master exists to compare against
    #[arg(long)]
    pub bootstrap: bool,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

pub fn run(args: &MakeMasterArgs, global: &GlobalArgs) -> Result<()> {
    if args.end < args.start {
        bail!("--end {} is before --start {}", args.end, args.start);
    }
    let orchestrator = build_orchestrator(global, &args.processing, |config| {
        if args.bootstrap {
            config.comparer.allow_missing_master = true;
        }
    })?;

    let criteria = MasterCriteria {
        cal_type: args.cal_type.into(),
        site: args.site.clone(),
        camera: args.camera.clone(),
        start: args.start,
        end: args.end,
    };
    let paths = orchestrator
        .collect_calibration_frames(&args.dir, &criteria)
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;
    println!(
        "Found {} {} frame(s) for {} {} between {} and {}",
        paths.len(),
        criteria.cal_type,
        criteria.site,
        criteria.camera,
        criteria.start,
        criteria.end
    );
    if paths.is_empty() {
        bail!("No matching calibration frames");
    }

    let reporter = BarReporter::new()?;
    let masters = orchestrator.make_masters(&paths, criteria.cal_type, &reporter)?;
    if masters.is_empty() {
        bail!(
            "No master made: need at least {} good, homogeneous frames per group",
            orchestrator.config().calibration.min_images
        );
    }
    for master in &masters {
        println!(
            "Master {} [{}] from {} frame(s), mean level {:.3}",
            master.path.display(),
            master.group_key,
            master.frame_count,
            master.mean_level
        );
    }
    Ok(())
}
