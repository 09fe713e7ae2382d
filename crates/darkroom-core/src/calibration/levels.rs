use ndarray::{s, ArrayView2};
use tracing::debug;

use crate::frame::Frame;

/// Median of the unmasked values of `data`, or `None` if all are masked.
pub fn masked_median(data: ArrayView2<f32>, mask: ArrayView2<u8>) -> Option<f64> {
    let mut values: Vec<f32> = data
        .iter()
        .zip(mask.iter())
        .filter(|(_, &m)| m == 0)
        .map(|(&v, _)| v)
        .collect();
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let upper = *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1;
    if n % 2 == 1 {
        return Some(upper as f64);
    }
    let lower = values[..mid]
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    Some((lower as f64 + upper as f64) / 2.0)
}

/// Subtract the frame's own median level and record it as the bias level.
pub fn subtract_bias_level(frame: &mut Frame) -> f64 {
    let level = masked_median(frame.data.view(), frame.mask.view()).unwrap_or(0.0);
    frame.data -= level as f32;
    frame.level = Some(level);
    frame.header.set("BIASLVL", level);
    debug!(level, "Subtracted bias level");
    level
}

/// Convert a dark frame to a rate by dividing data and uncertainty by the
/// exposure time. Frames with a non-positive exposure time are left alone.
pub fn normalize_dark(frame: &mut Frame) -> bool {
    let exptime = frame.attributes.exposure_time;
    if exptime <= 0.0 {
        return false;
    }
    let t = exptime as f32;
    frame.data /= t;
    frame.uncertainty /= t;
    frame.header.set("DARKNORM", true);
    true
}

/// Divide a flat by the median of its central quarter and record the level.
pub fn normalize_flat(frame: &mut Frame) -> Option<f64> {
    let (h, w) = frame.data.dim();
    let (r0, r1) = (h / 4, h - h / 4);
    let (c0, c1) = (w / 4, w - w / 4);
    let level = masked_median(
        frame.data.slice(s![r0..r1, c0..c1]),
        frame.mask.slice(s![r0..r1, c0..c1]),
    )?;
    if level <= 0.0 || !level.is_finite() {
        return None;
    }
    let l = level as f32;
    frame.data /= l;
    frame.uncertainty /= l;
    frame.level = Some(level);
    frame.header.set("FLATLVL", level);
    debug!(level, "Normalized flat field");
    Some(level)
}
