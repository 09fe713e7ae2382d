use ndarray::{Array2, Zip};
use tracing::debug;

use crate::frame::{Frame, Source};

use super::components::label_regions;
use super::{median_in_place, DetectionParams};

/// Clip applied to the lower-half residuals when estimating the noise.
const NOISE_CLIP_SIGMA: f64 = 5.0;

/// Sky level and noise of the unmasked pixels.
///
/// The sky is the median. The noise is the RMS of the pixels at or below the
/// median, measured from the median, so sources (which only push values up)
/// do not inflate it. One clipping pass drops low outliers such as dead
/// columns.
pub fn sky_background(frame: &Frame) -> Option<(f64, f64)> {
    let mut values: Vec<f64> = frame
        .data
        .iter()
        .zip(frame.mask.iter())
        .filter(|(v, &m)| m == 0 && v.is_finite())
        .map(|(&v, _)| v as f64)
        .collect();
    if values.is_empty() {
        return None;
    }
    let sky = median_in_place(&mut values);

    let low: Vec<f64> = values.iter().filter(|&&v| v <= sky).map(|v| sky - v).collect();
    let rms = |d: &[f64]| (d.iter().map(|x| x * x).sum::<f64>() / d.len().max(1) as f64).sqrt();
    let first = rms(&low);
    let clipped: Vec<f64> = low
        .into_iter()
        .filter(|&d| d <= NOISE_CLIP_SIGMA * first)
        .collect();
    Some((sky, rms(&clipped)))
}

#[derive(Default)]
struct Blob {
    area: usize,
    flux: f64,
    sum_x: f64,
    sum_y: f64,
    touches_edge: bool,
}

/// Find the sources in `frame`, brightest first.
///
/// Unmasked pixels more than `threshold_sigma` noise sigmas above the sky
/// are grouped into 4-connected regions. Regions smaller than `min_area` or
/// touching the frame edge are dropped. Positions are flux-weighted
/// centroids in FITS pixel coordinates, where the centre of the first pixel
/// is (1, 1); fluxes are sky-subtracted sums.
pub fn detect_sources(frame: &Frame, params: &DetectionParams) -> Vec<Source> {
    let Some((sky, noise)) = sky_background(frame) else {
        return Vec::new();
    };
    let threshold = sky + params.threshold_sigma * noise;

    let mut above = Array2::from_elem(frame.data.dim(), false);
    Zip::from(&mut above)
        .and(&frame.data)
        .and(&frame.mask)
        .for_each(|a, &v, &m| *a = m == 0 && (v as f64) > threshold);
    let (labels, count) = label_regions(&above);

    let (h, w) = frame.data.dim();
    let mut blobs: Vec<Blob> = (0..=count).map(|_| Blob::default()).collect();
    for ((row, col), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let flux = (frame.data[[row, col]] as f64 - sky).max(0.0);
        let blob = &mut blobs[label as usize];
        blob.area += 1;
        blob.flux += flux;
        blob.sum_x += flux * col as f64;
        blob.sum_y += flux * row as f64;
        blob.touches_edge |= row == 0 || col == 0 || row + 1 == h || col + 1 == w;
    }

    let mut sources: Vec<Source> = blobs
        .into_iter()
        .skip(1)
        .filter(|b| b.area >= params.min_area && !b.touches_edge && b.flux > 0.0)
        .map(|b| Source {
            x: b.sum_x / b.flux + 1.0,
            y: b.sum_y / b.flux + 1.0,
            flux: b.flux,
        })
        .collect();
    sources.sort_by(|a, b| b.flux.total_cmp(&a.flux));
    sources.truncate(params.max_sources);
    debug!(sky, noise, regions = count, sources = sources.len(), "Detected sources");
    sources
}
