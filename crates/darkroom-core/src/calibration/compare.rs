use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_ACCEPTABLE_PIXEL_FRACTION, DEFAULT_SIGNAL_TO_NOISE_THRESHOLD};
use crate::error::{ReductionError, Result};
use crate::frame::Frame;

use super::types::CalibrationType;

/// Thresholds for comparing a frame against a master calibration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparerParams {
    /// Residuals beyond this many sigma of expected noise are outliers.
    pub signal_to_noise_threshold: f64,
    /// Frames with a larger outlier fraction are flagged bad.
    pub acceptable_fraction: f64,
    /// Let frames pass when no master exists yet (bootstrapping the first master).
    pub allow_missing_master: bool,
}

impl Default for ComparerParams {
    fn default() -> Self {
        Self {
            signal_to_noise_threshold: DEFAULT_SIGNAL_TO_NOISE_THRESHOLD,
            acceptable_fraction: DEFAULT_ACCEPTABLE_PIXEL_FRACTION,
            allow_missing_master: false,
        }
    }
}

/// Result of one comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub is_bad: bool,
    pub outlier_fraction: f64,
    /// Factor the master was multiplied by before subtraction.
    pub scale: f64,
}

/// Factor that brings a master of `cal_type` to the units of `frame`.
///
/// Master darks are stored as rates, so they scale with exposure time. Bias
/// and normalised flats compare one to one.
pub fn master_scale(frame: &Frame, cal_type: CalibrationType) -> f64 {
    match cal_type {
        CalibrationType::Dark => frame.attributes.exposure_time,
        CalibrationType::Bias | CalibrationType::Flat => 1.0,
    }
}

/// Compare `frame` against the scaled `master`.
///
/// Expected per-pixel noise is read noise, Poisson noise of the scaled
/// pattern and the master's own uncertainty, added in quadrature. Pixels
/// masked in either frame are ignored.
pub fn compare(
    frame: &Frame,
    master: &Frame,
    cal_type: CalibrationType,
    params: &ComparerParams,
) -> Result<Comparison> {
    if frame.data.dim() != master.data.dim() {
        return Err(ReductionError::ShapeMismatch {
            frame: frame.data.dim(),
            calibration: master.data.dim(),
        });
    }

    let scale = master_scale(frame, cal_type);
    let rn2 = frame.readnoise * frame.readnoise;
    let threshold = params.signal_to_noise_threshold;

    let mut outliers = 0usize;
    let mut counted = 0usize;
    // Normalised flats are no longer in electrons; use the propagated
    // per-pixel uncertainty instead of the detector noise model.
    let use_frame_sigma = cal_type == CalibrationType::Flat;
    Zip::from(&frame.data)
        .and(&frame.uncertainty)
        .and(&frame.mask)
        .and(&master.data)
        .and(&master.uncertainty)
        .and(&master.mask)
        .for_each(|&d, &fu, &fm, &m, &mu, &mm| {
            if fm != 0 || mm != 0 {
                return;
            }
            let expected = scale * m as f64;
            let master_sigma = scale * mu as f64;
            let frame_var = if use_frame_sigma {
                (fu as f64) * (fu as f64)
            } else {
                rn2 + expected.max(0.0)
            };
            let noise = (frame_var + master_sigma * master_sigma).sqrt();
            let residual = (d as f64 - expected).abs();
            counted += 1;
            if residual > threshold * noise {
                outliers += 1;
            }
        });

    let outlier_fraction = if counted > 0 {
        outliers as f64 / counted as f64
    } else {
        0.0
    };

    Ok(Comparison {
        is_bad: outlier_fraction > params.acceptable_fraction,
        outlier_fraction,
        scale,
    })
}
