#[allow(dead_code)]
mod common;

use std::f64::consts::PI;

use ndarray::{array, Array2};
use tempfile::TempDir;

use darkroom_core::calibration::library::MemoryMasterLoader;
use darkroom_core::consts::WCS_SUCCESS;
use darkroom_core::detection::{
    detect_sources, label_regions, median_row_spectrum, pattern_noise_snr, sky_background,
    DetectionParams,
};
use darkroom_core::frame::{Frame, HeaderValue, ObsType, StageStatus};
use darkroom_core::io::{read_frame, write_frame};
use darkroom_core::pipeline::{PipelineRunner, ReductionConfig, StageContext, StageStep};
use darkroom_core::store::Database;

use common::{add_star, noisy_frame, rng, FixedSolver};

/// 64x64 sky at 100 with noise 5 and two stars, the brighter one first.
fn starfield(seed: u64) -> Frame {
    let mut frame = noisy_frame(&mut rng(seed), ObsType::Science, 64, 64, 100.0, 5.0);
    add_star(&mut frame, 40.3, 20.6, 800.0, 1.5);
    add_star(&mut frame, 20.25, 30.75, 3000.0, 1.5);
    frame
}

fn run_steps(frame: Frame, steps: &[StageStep], solver: &FixedSolver) -> Frame {
    let config = ReductionConfig::default();
    let db = Database::in_memory();
    let loader = MemoryMasterLoader::new();
    let ctx = StageContext {
        config: &config,
        calibrations: &db,
        masters: &loader,
        solver,
    };
    PipelineRunner::new(steps).run(frame, &ctx).frame
}

// ---------------------------------------------------------------------------
// Connected regions
// ---------------------------------------------------------------------------

#[test]
fn test_regions_are_four_connected() {
    let mask = array![
        [true, true, false, false],
        [false, false, false, true],
        [true, false, false, true],
        [false, true, false, false],
    ];
    let (labels, count) = label_regions(&mask);
    assert_eq!(count, 4);
    assert_eq!(labels[[0, 0]], 1);
    assert_eq!(labels[[0, 1]], 1);
    assert_eq!(labels[[1, 3]], 2);
    assert_eq!(labels[[2, 3]], 2);
    // Diagonal neighbours stay apart.
    assert_eq!(labels[[2, 0]], 3);
    assert_eq!(labels[[3, 1]], 4);
    assert_eq!(labels[[1, 1]], 0);
}

#[test]
fn test_u_shape_merges_into_one_region() {
    let mask = array![
        [true, false, true],
        [true, false, true],
        [true, true, true],
    ];
    let (labels, count) = label_regions(&mask);
    assert_eq!(count, 1);
    assert_eq!(labels[[0, 2]], 1);
    assert_eq!(labels[[1, 1]], 0);
}

#[test]
fn test_empty_mask_has_no_regions() {
    let (labels, count) = label_regions(&Array2::from_elem((5, 7), false));
    assert_eq!(count, 0);
    assert!(labels.iter().all(|&l| l == 0));
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[test]
fn test_sky_background_ignores_stars() {
    let (sky, noise) = sky_background(&starfield(1)).unwrap();
    assert!((sky - 100.0).abs() < 1.0, "sky = {sky}");
    assert!((noise - 5.0).abs() < 0.5, "noise = {noise}");
}

#[test]
fn test_sources_are_centroided_and_ordered_by_flux() {
    let sources = detect_sources(&starfield(2), &DetectionParams::default());
    assert_eq!(sources.len(), 2, "{sources:?}");

    let bright = &sources[0];
    assert!((bright.x - 21.25).abs() < 0.15, "x = {}", bright.x);
    assert!((bright.y - 31.75).abs() < 0.15, "y = {}", bright.y);
    let faint = &sources[1];
    assert!((faint.x - 41.3).abs() < 0.15, "x = {}", faint.x);
    assert!((faint.y - 21.6).abs() < 0.15, "y = {}", faint.y);
    assert!(bright.flux > faint.flux);
    // Total flux of a Gaussian is 2 pi sigma^2 times the peak.
    let expected = 2.0 * PI * 1.5 * 1.5 * 3000.0;
    assert!((bright.flux / expected - 1.0).abs() < 0.1, "flux = {}", bright.flux);
}

#[test]
fn test_masked_and_tiny_regions_are_not_sources() {
    let mut frame = starfield(3);
    // A masked bad column and a single hot pixel.
    for row in 5..60 {
        frame.data[[row, 10]] = 60_000.0;
        frame.mask[[row, 10]] = 1;
    }
    frame.data[[50, 50]] = 5000.0;

    let sources = detect_sources(&frame, &DetectionParams::default());
    assert_eq!(sources.len(), 2, "{sources:?}");
}

#[test]
fn test_source_count_is_capped() {
    let params = DetectionParams {
        max_sources: 1,
        ..DetectionParams::default()
    };
    let sources = detect_sources(&starfield(4), &params);
    assert_eq!(sources.len(), 1);
    assert!(sources[0].flux > 30_000.0);
}

#[test]
fn test_blank_sky_has_no_sources() {
    let frame = noisy_frame(&mut rng(5), ObsType::Science, 64, 64, 100.0, 5.0);
    assert!(detect_sources(&frame, &DetectionParams::default()).is_empty());

    let frame = run_steps(frame, &[StageStep::SourceDetector], &FixedSolver::failing("none"));
    assert_eq!(frame.header.get_f64("NSOURCES"), Some(0.0));
    assert!(matches!(
        frame.status.get("SourceDetector"),
        Some(StageStatus::Flagged(_))
    ));
    assert!(!frame.is_bad);
}

#[test]
fn test_frame_read_from_disk_is_detected_and_solved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lsc-fa15-20240301-0007-e00.fits");
    let mut frame = starfield(6);
    frame.pointing = Some((83.82, -5.39));
    write_frame(&frame, &path).unwrap();

    let back = read_frame(&path).unwrap();
    assert!(back.catalog.is_none());
    let steps = [
        StageStep::SourceDetector,
        StageStep::PlateSolver,
        StageStep::PointingTest,
    ];
    let reduced = run_steps(back, &steps, &FixedSolver::solved_at(83.82, -5.39));

    assert_eq!(reduced.header.get_f64("NSOURCES"), Some(2.0));
    assert_eq!(reduced.catalog.as_ref().map(Vec::len), Some(2));
    assert_eq!(reduced.header.get_f64("WCSERR"), Some(WCS_SUCCESS as f64));
    assert_eq!(reduced.status.get("PlateSolver"), Some(&StageStatus::Ok));
    assert_eq!(reduced.status.get("PointingTest"), Some(&StageStatus::Ok));
}

// ---------------------------------------------------------------------------
// Pattern noise
// ---------------------------------------------------------------------------

/// 64x64 white noise (sigma 10) plus, optionally, a row sinusoid of
/// amplitude 10 with eight cycles per row.
fn patterned(seed: u64, with_pattern: bool) -> Frame {
    let mut frame = noisy_frame(&mut rng(seed), ObsType::Flat, 64, 64, 1000.0, 10.0);
    if with_pattern {
        for ((_, col), v) in frame.data.indexed_iter_mut() {
            *v += 10.0 * (2.0 * PI * 8.0 * col as f64 / 64.0).sin() as f32;
        }
    }
    frame
}

#[test]
fn test_row_spectrum_peaks_at_the_pattern_frequency() {
    let spectrum = median_row_spectrum(&patterned(7, true).data);
    assert_eq!(spectrum.len(), 32);
    let peak = spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| k + 1);
    assert_eq!(peak, Some(8));
}

#[test]
fn test_row_pattern_is_detected() {
    let snr = pattern_noise_snr(&patterned(8, true).data, 5).unwrap();
    assert!(snr > 10.0, "snr = {snr}");

    let frame = run_steps(
        patterned(8, true),
        &[StageStep::PatternNoiseDetector],
        &FixedSolver::failing("none"),
    );
    assert_eq!(frame.header.get("PATNOISE"), Some(&HeaderValue::Bool(true)));
    assert!(matches!(
        frame.status.get("PatternNoiseDetector"),
        Some(StageStatus::Flagged(_))
    ));
    assert!(!frame.is_bad);
}

#[test]
fn test_white_noise_is_not_pattern_noise() {
    let snr = pattern_noise_snr(&patterned(9, false).data, 5).unwrap();
    assert!(snr < 10.0, "snr = {snr}");

    let frame = run_steps(
        patterned(9, false),
        &[StageStep::PatternNoiseDetector],
        &FixedSolver::failing("none"),
    );
    assert_eq!(frame.header.get("PATNOISE"), Some(&HeaderValue::Bool(false)));
    assert_eq!(frame.status.get("PatternNoiseDetector"), Some(&StageStatus::Ok));
}

#[test]
fn test_narrow_frames_are_not_searched() {
    assert!(pattern_noise_snr(&Array2::zeros((10, 3)), 0).is_none());
    assert!(pattern_noise_snr(&Array2::zeros((10, 16)), 7).is_none());
}
