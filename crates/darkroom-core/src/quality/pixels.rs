use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Fraction of pixels at or above `saturation`.
pub fn saturated_fraction(data: &Array2<f32>, saturation: f64) -> f64 {
    let level = saturation as f32;
    fraction_where(data, |v| v >= level)
}

/// Fraction of pixels reading exactly 1000, the signature of a known
/// controller fault.
pub fn thousands_fraction(data: &Array2<f32>) -> f64 {
    fraction_where(data, |v| v == 1000.0)
}

fn fraction_where(data: &Array2<f32>, pred: impl Fn(f32) -> bool + Sync) -> f64 {
    let total = data.len();
    if total == 0 {
        return 0.0;
    }
    let (h, w) = data.dim();
    let count = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        data.outer_iter()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|row| row.iter().filter(|&&v| pred(v)).count())
            .sum()
    } else {
        data.iter().filter(|&&v| pred(v)).count()
    };
    count as f64 / total as f64
}
