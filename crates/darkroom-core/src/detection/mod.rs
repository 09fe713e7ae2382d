//! Source detection for plate solving and row pattern-noise detection.

pub mod components;
pub mod pattern;
pub mod sources;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_DETECTION_MIN_AREA, DEFAULT_DETECTION_THRESHOLD_SIGMA, DEFAULT_MAX_SOURCES,
    DEFAULT_PATTERN_NOISE_SKIP_BINS, DEFAULT_PATTERN_NOISE_SNR,
};

pub use components::label_regions;
pub use pattern::{median_row_spectrum, pattern_noise_snr};
pub use sources::{detect_sources, sky_background};

/// Tuning for the source detector and the pattern-noise detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Pixels this many noise sigmas above the sky belong to a source.
    pub threshold_sigma: f64,
    /// Regions with fewer pixels are dropped as noise or hot pixels.
    pub min_area: usize,
    /// Only the brightest sources are kept.
    pub max_sources: usize,
    /// Row-spectrum peaks this many robust sigmas above the median are
    /// pattern noise.
    pub pattern_snr_threshold: f64,
    /// Lowest spatial frequencies left out of the pattern search.
    pub pattern_skip_bins: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold_sigma: DEFAULT_DETECTION_THRESHOLD_SIGMA,
            min_area: DEFAULT_DETECTION_MIN_AREA,
            max_sources: DEFAULT_MAX_SOURCES,
            pattern_snr_threshold: DEFAULT_PATTERN_NOISE_SNR,
            pattern_skip_bins: DEFAULT_PATTERN_NOISE_SKIP_BINS,
        }
    }
}

/// Scale from a median absolute deviation to a Gaussian sigma.
pub(crate) const MAD_TO_SIGMA: f64 = 1.4826;

/// Median of `values`, reordering them; NaN for an empty slice.
pub(crate) fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    let upper = *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1;
    if n % 2 == 1 {
        return upper;
    }
    let lower = values[..mid].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lower + upper) / 2.0
}
