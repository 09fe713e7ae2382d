use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::astrometry::{solve_frame, PlateSolver, SolveOutcome};
use crate::calibration::apply::{divide_by_master, subtract_master};
use crate::calibration::compare::{compare, master_scale};
use crate::calibration::levels::{normalize_dark, normalize_flat, subtract_bias_level};
use crate::calibration::select::select_master;
use crate::calibration::types::{CalibrationType, MasterCalibration};
use crate::calibration::MasterLoader;
use crate::detection::{detect_sources, pattern_noise_snr};
use crate::error::{ReductionError, Result};
use crate::frame::{Frame, ObsType, StageStatus};
use crate::group::GroupKey;
use crate::quality::{angular_offset_arcsec, header_problems, saturated_fraction, thousands_fraction};
use crate::store::CalibrationStore;

use super::config::ReductionConfig;
use super::types::StageOutcome;

/// Everything a stage may consult besides the frame itself.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub config: &'a ReductionConfig,
    pub calibrations: &'a dyn CalibrationStore,
    pub masters: &'a dyn MasterLoader,
    pub solver: &'a dyn PlateSolver,
}

/// One configurable reduction step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStep {
    HeaderSanity,
    SaturationTest,
    ThousandsTest,
    BiasLevelSubtractor,
    DarkNormalizer,
    FlatNormalizer,
    BiasComparer,
    DarkComparer,
    FlatComparer,
    BiasSubtractor,
    DarkSubtractor,
    FlatDivider,
    PatternNoiseDetector,
    SourceDetector,
    PlateSolver,
    PointingTest,
}

impl StageStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HeaderSanity => "HeaderSanity",
            Self::SaturationTest => "SaturationTest",
            Self::ThousandsTest => "ThousandsTest",
            Self::BiasLevelSubtractor => "BiasLevelSubtractor",
            Self::DarkNormalizer => "DarkNormalizer",
            Self::FlatNormalizer => "FlatNormalizer",
            Self::BiasComparer => "BiasComparer",
            Self::DarkComparer => "DarkComparer",
            Self::FlatComparer => "FlatComparer",
            Self::BiasSubtractor => "BiasSubtractor",
            Self::DarkSubtractor => "DarkSubtractor",
            Self::FlatDivider => "FlatDivider",
            Self::PatternNoiseDetector => "PatternNoiseDetector",
            Self::SourceDetector => "SourceDetector",
            Self::PlateSolver => "PlateSolver",
            Self::PointingTest => "PointingTest",
        }
    }

    /// Whether this step runs on frames of `obstype`.
    pub fn applies_to(&self, obstype: ObsType) -> bool {
        use ObsType::*;
        match self {
            Self::HeaderSanity | Self::SaturationTest | Self::ThousandsTest => true,
            Self::BiasLevelSubtractor | Self::BiasComparer => obstype == Bias,
            Self::DarkNormalizer | Self::DarkComparer => obstype == Dark,
            Self::FlatNormalizer | Self::FlatComparer => obstype == Flat,
            Self::BiasSubtractor => matches!(obstype, Dark | Flat | Science),
            Self::DarkSubtractor => matches!(obstype, Flat | Science),
            Self::PatternNoiseDetector => matches!(obstype, Flat | Science),
            Self::FlatDivider | Self::SourceDetector | Self::PlateSolver | Self::PointingTest => {
                obstype == Science
            }
        }
    }

    /// Run the step on `frame`.
    ///
    /// Problems with the data are recorded on the frame; errors are left to
    /// the runner to classify.
    pub fn apply(&self, frame: &mut Frame, ctx: &StageContext<'_>) -> Result<StageOutcome> {
        let name = self.name();
        match self {
            Self::HeaderSanity => {
                let problems = header_problems(frame);
                if problems.is_empty() {
                    frame.record(name, StageStatus::Ok);
                    return Ok(StageOutcome::Continue);
                }
                let reason = problems.join("; ");
                frame.flag_bad(name, reason.clone());
                Ok(StageOutcome::Stop(reason))
            }
            Self::SaturationTest => {
                let fraction = saturated_fraction(&frame.data, frame.saturation);
                frame.header.set("SATFRAC", fraction);
                reject_above(frame, name, fraction, ctx.config.quality.saturation_fraction, "saturated")
            }
            Self::ThousandsTest => {
                let fraction = thousands_fraction(&frame.data);
                frame.header.set("THOUFRAC", fraction);
                reject_above(frame, name, fraction, ctx.config.quality.thousands_fraction, "exactly 1000")
            }
            Self::BiasLevelSubtractor => {
                subtract_bias_level(frame);
                frame.record(name, StageStatus::Ok);
                Ok(StageOutcome::Continue)
            }
            Self::DarkNormalizer => {
                if normalize_dark(frame) {
                    frame.record(name, StageStatus::Ok);
                } else {
                    frame.flag_bad(name, "exposure time is not positive");
                }
                Ok(StageOutcome::Continue)
            }
            Self::FlatNormalizer => {
                if normalize_flat(frame).is_some() {
                    frame.record(name, StageStatus::Ok);
                } else {
                    frame.flag_bad(name, "flat level is not positive");
                }
                Ok(StageOutcome::Continue)
            }
            Self::BiasComparer => compare_with_master(frame, name, CalibrationType::Bias, ctx),
            Self::DarkComparer => compare_with_master(frame, name, CalibrationType::Dark, ctx),
            Self::FlatComparer => compare_with_master(frame, name, CalibrationType::Flat, ctx),
            Self::BiasSubtractor => {
                let (record, master) = load_master(frame, CalibrationType::Bias, ctx)?;
                subtract_master(frame, &master, 1.0)?;
                // The master holds only the residual pattern; its level goes separately.
                frame.data -= record.mean_level as f32;
                frame.header.set("BIASLVL", record.mean_level);
                note_master(frame, name, &record);
                Ok(StageOutcome::Continue)
            }
            Self::DarkSubtractor => {
                let (record, master) = load_master(frame, CalibrationType::Dark, ctx)?;
                let scale = master_scale(frame, CalibrationType::Dark);
                subtract_master(frame, &master, scale)?;
                note_master(frame, name, &record);
                Ok(StageOutcome::Continue)
            }
            Self::FlatDivider => {
                let (record, master) = load_master(frame, CalibrationType::Flat, ctx)?;
                divide_by_master(frame, &master)?;
                note_master(frame, name, &record);
                Ok(StageOutcome::Continue)
            }
            Self::PatternNoiseDetector => {
                let params = &ctx.config.detection;
                let Some(snr) = pattern_noise_snr(&frame.data, params.pattern_skip_bins) else {
                    frame.record(name, StageStatus::Skipped("frame too narrow".into()));
                    return Ok(StageOutcome::Continue);
                };
                let found = snr > params.pattern_snr_threshold;
                frame.header.set("PNSNR", snr);
                frame.header.set("PATNOISE", found);
                if found {
                    warn!(snr, "Row pattern noise detected");
                    frame.record(name, StageStatus::Flagged(format!("pattern noise at SNR {snr:.1}")));
                } else {
                    frame.record(name, StageStatus::Ok);
                }
                Ok(StageOutcome::Continue)
            }
            Self::SourceDetector => {
                let sources = detect_sources(frame, &ctx.config.detection);
                frame.header.set("NSOURCES", sources.len() as i64);
                if sources.is_empty() {
                    frame.record(name, StageStatus::Flagged("no sources detected".into()));
                } else {
                    frame.record(name, StageStatus::Ok);
                }
                frame.catalog = Some(sources);
                Ok(StageOutcome::Continue)
            }
            Self::PlateSolver => {
                match solve_frame(frame, ctx.solver, ctx.config.astrometry.pixel_scale) {
                    SolveOutcome::Solved(_) => frame.record(name, StageStatus::Ok),
                    SolveOutcome::Failed(reason) => {
                        frame.record(name, StageStatus::Flagged(reason))
                    }
                }
                Ok(StageOutcome::Continue)
            }
            Self::PointingTest => {
                check_pointing(frame, name, ctx.config.quality.pointing_tolerance_arcsec);
                Ok(StageOutcome::Continue)
            }
        }
    }
}

fn reject_above(
    frame: &mut Frame,
    name: &str,
    fraction: f64,
    threshold: f64,
    what: &str,
) -> Result<StageOutcome> {
    if fraction > threshold {
        let reason = format!("{:.2}% of pixels {what}", fraction * 100.0);
        frame.flag_bad(name, reason.clone());
        return Ok(StageOutcome::Stop(reason));
    }
    frame.record(name, StageStatus::Ok);
    Ok(StageOutcome::Continue)
}

fn load_master(
    frame: &Frame,
    cal_type: CalibrationType,
    ctx: &StageContext<'_>,
) -> Result<(MasterCalibration, std::sync::Arc<Frame>)> {
    let key = GroupKey::of(frame, ctx.config.calibration.group_by(cal_type));
    let record = select_master(ctx.calibrations, cal_type, &frame.id.instrument, &key, frame.id.epoch)?;
    let master = ctx.masters.load(&record)?;
    Ok((record, master))
}

/// Record which master was applied (`L1IDBIAS`, `L1IDDARK`, `L1IDFLAT`).
fn note_master(frame: &mut Frame, name: &str, record: &MasterCalibration) {
    let key = format!("L1ID{}", record.cal_type);
    frame
        .header
        .set(&key, record.filename().unwrap_or_default().to_string());
    frame.record(name, StageStatus::Ok);
    debug!(stage = name, master = %record.path.display(), "Applied master calibration");
}

fn compare_with_master(
    frame: &mut Frame,
    name: &str,
    cal_type: CalibrationType,
    ctx: &StageContext<'_>,
) -> Result<StageOutcome> {
    let params = &ctx.config.comparer;
    let (_, master) = match load_master(frame, cal_type, ctx) {
        Ok(found) => found,
        Err(ReductionError::NoCalibrationFound { .. }) if params.allow_missing_master => {
            info!(stage = name, "No master to compare against, accepting frame");
            frame.record(name, StageStatus::Skipped("no master calibration".into()));
            return Ok(StageOutcome::Continue);
        }
        Err(e) => return Err(e),
    };

    let comparison = compare(frame, &master, cal_type, params)?;
    frame
        .header
        .set(&format!("{cal_type}CMPF"), comparison.outlier_fraction);
    if comparison.is_bad {
        warn!(
            stage = name,
            outlier_fraction = comparison.outlier_fraction,
            "Frame deviates from master calibration"
        );
        frame.flag_bad(
            name,
            format!(
                "{:.2}% of pixels deviate from the master",
                comparison.outlier_fraction * 100.0
            ),
        );
    } else {
        frame.record(name, StageStatus::Ok);
    }
    Ok(StageOutcome::Continue)
}

fn check_pointing(frame: &mut Frame, name: &str, tolerance_arcsec: f64) {
    let solved = match (
        frame.header.get_f64("WCSERR"),
        frame.header.get_f64("CRVAL1"),
        frame.header.get_f64("CRVAL2"),
    ) {
        (Some(err), Some(ra), Some(dec)) if err == 0.0 => (ra, dec),
        _ => {
            frame.record(name, StageStatus::Skipped("no WCS solution".into()));
            return;
        }
    };
    let Some(requested) = frame.pointing else {
        frame.record(name, StageStatus::Skipped("no requested pointing".into()));
        return;
    };

    let offset = angular_offset_arcsec(requested, solved);
    frame.header.set("PNTOFST", offset);
    if offset > tolerance_arcsec {
        warn!(offset_arcsec = offset, tolerance_arcsec, "Pointing offset too large");
        frame.record(
            name,
            StageStatus::Flagged(format!("pointing offset {offset:.1} arcsec")),
        );
    } else {
        frame.record(name, StageStatus::Ok);
    }
}
