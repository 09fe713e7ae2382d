//! Per-frame quality checks. Each check measures; the pipeline stage decides
//! what to record on the frame.

pub mod header;
pub mod pixels;
pub mod pointing;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_POINTING_TOLERANCE_ARCSEC, DEFAULT_SATURATION_FRACTION, DEFAULT_THOUSANDS_FRACTION,
};

pub use header::header_problems;
pub use pixels::{saturated_fraction, thousands_fraction};
pub use pointing::angular_offset_arcsec;

/// Thresholds for the quality stages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    /// Frames with a larger fraction of saturated pixels are bad.
    pub saturation_fraction: f64,
    /// Frames with a larger fraction of pixels reading exactly 1000 are bad.
    pub thousands_fraction: f64,
    /// Pointing offsets above this are reported.
    pub pointing_tolerance_arcsec: f64,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            saturation_fraction: DEFAULT_SATURATION_FRACTION,
            thousands_fraction: DEFAULT_THOUSANDS_FRACTION,
            pointing_tolerance_arcsec: DEFAULT_POINTING_TOLERANCE_ARCSEC,
        }
    }
}
