use ndarray::Array2;
use rayon::prelude::*;
use tracing::info;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::frame::Frame;
use crate::group::FrameGroup;

use super::types::{CalibrationType, CombinedMaster};

/// Combine a homogeneous group into a master calibration.
///
/// Returns `None` when the group holds fewer than `min_images` frames. Each
/// output pixel is the mean over the frames that do not mask it, accumulated
/// in f64; its uncertainty is `sqrt(sum(sigma_i^2)) / n`, so equal inputs give
/// `sigma / sqrt(n)`. Flats are expected to be level-normalised already.
pub fn combine(
    group: &FrameGroup,
    cal_type: CalibrationType,
    min_images: usize,
) -> Option<CombinedMaster> {
    let frames = group.frames();
    if frames.len() < min_images || frames.is_empty() {
        info!(
            cal_type = %cal_type,
            frames = frames.len(),
            min_images,
            "Not enough frames to build a master calibration"
        );
        return None;
    }

    let (h, w) = frames[0].data.dim();
    let n = frames.len();

    let rows: Vec<Vec<PixelStack>> = if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        (0..h)
            .into_par_iter()
            .map(|row| combine_row(frames, row, w))
            .collect()
    } else {
        (0..h).map(|row| combine_row(frames, row, w)).collect()
    };

    let mut data = Array2::<f32>::zeros((h, w));
    let mut uncertainty = Array2::<f32>::zeros((h, w));
    let mut mask = Array2::<u8>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, px) in row_data.into_iter().enumerate() {
            data[[row, col]] = px.value as f32;
            uncertainty[[row, col]] = px.sigma as f32;
            mask[[row, col]] = px.masked as u8;
        }
    }

    let mean_level = frames.iter().map(|f| f.level.unwrap_or(0.0)).sum::<f64>() / n as f64;
    let readnoise = uncertainty.iter().map(|&v| v as f64).sum::<f64>() / (h * w).max(1) as f64;

    let template = &frames[0];
    let mut frame = Frame::new(
        template.id.clone(),
        cal_type.obstype(),
        template.attributes.clone(),
        data,
    );
    frame.uncertainty = uncertainty;
    frame.mask = mask;
    frame.readnoise = readnoise;
    frame.saturation = template.saturation;
    frame.level = Some(mean_level);
    frame.header = template.header.clone();
    frame.header.set("OBSTYPE", cal_type.obstype().to_string());
    frame.header.set("NCOMBINE", n as i64);
    frame.header.set("MEANLVL", mean_level);
    frame.header.set(cal_type.level_keyword(), mean_level);
    frame.header.set("RDNOISE", readnoise);
    frame.header.set("ISMASTER", true);

    info!(
        cal_type = %cal_type,
        frames = n,
        mean_level,
        readnoise,
        "Master calibration combined"
    );

    Some(CombinedMaster {
        cal_type,
        group_key: group.key().clone(),
        frame,
        mean_level,
        readnoise,
        frame_count: n,
    })
}

struct PixelStack {
    value: f64,
    sigma: f64,
    masked: bool,
}

fn combine_row(frames: &[Frame], row: usize, width: usize) -> Vec<PixelStack> {
    (0..width)
        .map(|col| {
            let mut sum = 0.0f64;
            let mut var = 0.0f64;
            let mut count = 0usize;
            for frame in frames {
                if frame.mask[[row, col]] == 0 {
                    let s = frame.uncertainty[[row, col]] as f64;
                    sum += frame.data[[row, col]] as f64;
                    var += s * s;
                    count += 1;
                }
            }
            if count > 0 {
                let n = count as f64;
                return PixelStack {
                    value: sum / n,
                    sigma: var.sqrt() / n,
                    masked: false,
                };
            }

            // Every frame masks this pixel: fall back to the plain mean.
            let n = frames.len() as f64;
            for frame in frames {
                let s = frame.uncertainty[[row, col]] as f64;
                sum += frame.data[[row, col]] as f64;
                var += s * s;
            }
            PixelStack {
                value: sum / n,
                sigma: var.sqrt() / n,
                masked: true,
            }
        })
        .collect()
}
