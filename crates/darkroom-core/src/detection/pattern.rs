use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

use super::{median_in_place, MAD_TO_SIGMA};

/// Amplitude spectrum along the rows, medianed over all rows.
///
/// Element `k` is spatial frequency `k + 1` cycles per row; the constant term
/// is left out. Empty for frames narrower than four pixels.
pub fn median_row_spectrum(data: &Array2<f32>) -> Vec<f64> {
    let (h, w) = data.dim();
    if h == 0 || w < 4 {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(w);

    let bins = w / 2;
    let mut per_bin: Vec<Vec<f64>> = vec![Vec::with_capacity(h); bins];
    let mut buffer = vec![Complex::new(0.0, 0.0); w];
    for row in data.rows() {
        for (slot, &v) in buffer.iter_mut().zip(row.iter()) {
            *slot = Complex::new(v as f64, 0.0);
        }
        fft.process(&mut buffer);
        for (k, amplitudes) in per_bin.iter_mut().enumerate() {
            amplitudes.push(buffer[k + 1].norm());
        }
    }
    per_bin
        .into_iter()
        .map(|mut amplitudes| median_in_place(&mut amplitudes))
        .collect()
}

/// Height of the strongest peak in the median row spectrum, in robust sigmas
/// above the spectrum's median.
///
/// The lowest `skip_bins` frequencies, where illumination gradients live,
/// are left out. `None` when fewer than three frequencies remain.
pub fn pattern_noise_snr(data: &Array2<f32>, skip_bins: usize) -> Option<f64> {
    let spectrum = median_row_spectrum(data);
    let tail = spectrum.get(skip_bins..)?;
    if tail.len() < 3 {
        return None;
    }
    let median = median_in_place(&mut tail.to_vec());
    let mut deviations: Vec<f64> = tail.iter().map(|p| (p - median).abs()).collect();
    let sigma = (MAD_TO_SIGMA * median_in_place(&mut deviations))
        .max(f64::EPSILON * median.abs().max(1.0));
    let peak = tail.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(((peak - median) / sigma).max(0.0))
}
