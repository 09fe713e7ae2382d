#[allow(dead_code)]
mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tempfile::TempDir;

use darkroom_core::calibration::types::CalibrationType;
use darkroom_core::detection::sky_background;
use darkroom_core::frame::{Frame, ObsType, StageStatus};
use darkroom_core::io::{read_frame, read_header, stage_statuses};
use darkroom_core::notify::ChannelPublisher;
use darkroom_core::pipeline::{
    CancelToken, FileOutcome, MasterCriteria, NoOpReporter, Orchestrator, PipelineStage,
    ProgressReporter, ReductionConfig, StageStep,
};
use darkroom_core::store::{CalibrationStore, Database, Instrument, InstrumentStore};
use darkroom_core::tracking::SkipReason;

use common::{
    add_star, date, frame_id, noisy_frame, raw_frame, rng, write_raw, FixedSolver, CAMERA, SITE,
};

fn config_for(root: &Path) -> ReductionConfig {
    let mut config = ReductionConfig::default();
    config.processing.processed_path = root.join("processed");
    config.processing.max_tries = 2;
    config.comparer.allow_missing_master = true;
    config.stages.science = vec![
        StageStep::HeaderSanity,
        StageStep::SaturationTest,
        StageStep::ThousandsTest,
        StageStep::BiasSubtractor,
    ];
    config
}

fn register_camera(db: &Database, schedulable: bool) {
    db.upsert_instrument(Instrument {
        site: SITE.into(),
        camera: CAMERA.into(),
        enclosure: "domb".into(),
        telescope: "1m0a".into(),
        camera_type: "1m0-SciCam-Sinistro".into(),
        schedulable,
    })
    .unwrap();
}

/// Write `n` raw bias frames for 2024-03-01 into `dir`.
fn write_biases(dir: &Path, n: usize) -> Vec<PathBuf> {
    let mut r = rng(99);
    (0..n)
        .map(|i| {
            let name = format!("lsc-fa15-20240301-{:04}-b00.fits", i + 1);
            let frame = raw_frame(&mut r, ObsType::Bias, &name, date(2024, 3, 1), 500.0, 10.0);
            write_raw(dir, &frame)
        })
        .collect()
}

fn write_science(dir: &Path, name: &str) -> PathBuf {
    let mut r = rng(5);
    let frame = raw_frame(&mut r, ObsType::Science, name, date(2024, 3, 2), 800.0, 10.0);
    write_raw(dir, &frame)
}

// ---------------------------------------------------------------------------
// Master creation
// ---------------------------------------------------------------------------

#[test]
fn test_bias_master_is_built_and_published() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let paths = write_biases(&raw, 6);

    let db = Arc::new(Database::in_memory());
    let publisher = Arc::new(ChannelPublisher::new());
    let published = publisher.subscribe();
    let orch = Orchestrator::new(config_for(tmp.path()), db.clone()).with_publisher(publisher.clone());

    let masters = orch
        .make_masters(&paths, CalibrationType::Bias, &NoOpReporter)
        .unwrap();

    assert_eq!(masters.len(), 1);
    let master = &masters[0];
    assert_eq!(master.frame_count, 6);
    assert_eq!(master.dayobs, date(2024, 3, 1));
    assert!((master.mean_level - 500.0).abs() < 5.0, "level {}", master.mean_level);
    assert!(master.path.exists());
    assert_eq!(
        master.path,
        tmp.path()
            .join("processed/lsc/fa15/20240301/processed/lsc-fa15-20240301-bias-bin1x1.fits")
    );
    assert_eq!(published.try_recv().unwrap(), master.path);
    assert_eq!(db.masters(CalibrationType::Bias, CAMERA).unwrap().len(), 1);

    let on_disk = read_frame(&master.path).unwrap();
    assert_eq!(on_disk.obstype, ObsType::Bias);
    assert_eq!(on_disk.header.get_f64("NCOMBINE"), Some(6.0));
    assert_eq!(on_disk.header.get_f64("BIASLVL"), on_disk.header.get_f64("MEANLVL"));
    assert!(on_disk.data.iter().all(|v| v.abs() < 20.0));
}

#[test]
fn test_too_few_frames_publish_nothing() {
    let tmp = TempDir::new().unwrap();
    let paths = write_biases(&tmp.path().join("raw"), 3);
    let db = Arc::new(Database::in_memory());
    let orch = Orchestrator::new(config_for(tmp.path()), db.clone());

    let masters = orch
        .make_masters(&paths, CalibrationType::Bias, &NoOpReporter)
        .unwrap();
    assert!(masters.is_empty());
    assert!(db.masters(CalibrationType::Bias, CAMERA).unwrap().is_empty());
}

#[test]
fn test_frames_of_other_types_are_not_combined() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let mut paths = write_biases(&raw, 5);
    paths.push(write_science(&raw, "lsc-fa15-20240302-0001-e00.fits"));

    let orch = Orchestrator::new(config_for(tmp.path()), Arc::new(Database::in_memory()));
    let masters = orch
        .make_masters(&paths, CalibrationType::Bias, &NoOpReporter)
        .unwrap();
    assert_eq!(masters.len(), 1);
    assert_eq!(masters[0].frame_count, 5);
}

#[test]
fn test_collect_calibration_frames_filters_by_criteria() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let biases = write_biases(&raw, 3);
    write_science(&raw, "lsc-fa15-20240302-0001-e00.fits");
    std::fs::write(raw.join("readme.txt"), "not a frame").unwrap();

    let orch = Orchestrator::new(config_for(tmp.path()), Arc::new(Database::in_memory()));
    let mut criteria = MasterCriteria {
        cal_type: CalibrationType::Bias,
        site: SITE.into(),
        camera: CAMERA.into(),
        start: date(2024, 3, 1),
        end: date(2024, 3, 1),
    };
    assert_eq!(orch.collect_calibration_frames(&raw, &criteria).unwrap(), biases);

    criteria.start = date(2024, 3, 2);
    criteria.end = date(2024, 3, 5);
    assert!(orch.collect_calibration_frames(&raw, &criteria).unwrap().is_empty());

    criteria.start = date(2024, 3, 1);
    criteria.camera = "kb99".into();
    assert!(orch.collect_calibration_frames(&raw, &criteria).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Science reduction
// ---------------------------------------------------------------------------

/// 64x64 raw frame of `obstype` at `level` with Gaussian noise `sigma`.
fn raw_64(seed: u64, obstype: ObsType, name: &str, epoch: NaiveDate, level: f32, sigma: f32) -> Frame {
    let mut frame = noisy_frame(&mut rng(seed), obstype, 64, 64, level, sigma);
    frame.id = frame_id(name, epoch);
    frame.readnoise = 10.0;
    frame.init_poisson_uncertainty();
    frame
}

/// Five raw frames of `obstype` for 2024-03-01, written into `dir`.
fn write_night(dir: &Path, obstype: ObsType, tag: &str, level: f32, sigma: f32) -> Vec<PathBuf> {
    (0..5)
        .map(|i| {
            let name = format!("lsc-fa15-20240301-{:04}-{tag}00.fits", i + 1);
            let frame = raw_64(100 + i as u64, obstype, &name, date(2024, 3, 1), level, sigma);
            write_raw(dir, &frame)
        })
        .collect()
}

#[test]
fn test_default_stage_lists_reduce_a_science_frame_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");

    // Bias 500, dark current 2 ADU/s over 30 s, flat signal 10000.
    let biases = write_night(&raw, ObsType::Bias, "b", 500.0, 10.0);
    let darks = write_night(&raw, ObsType::Dark, "d", 560.0, 10.0);
    let flats = write_night(&raw, ObsType::Flat, "f", 10_560.0, 100.0);

    let (ra, dec) = (83.82, -5.39);
    let name = "lsc-fa15-20240302-0011-e00.fits";
    let mut science = raw_64(7, ObsType::Science, name, date(2024, 3, 2), 1560.0, 10.0);
    add_star(&mut science, 32.3, 30.6, 3000.0, 1.5);
    add_star(&mut science, 15.2, 45.7, 1500.0, 1.5);
    science.pointing = Some((ra, dec));
    let science = write_raw(&raw, &science);

    let mut config = config_for(tmp.path());
    config.stages.science = ReductionConfig::default().stages.science;
    let db = Arc::new(Database::in_memory());
    register_camera(&db, true);
    let solver = Arc::new(FixedSolver::solved_at(ra, dec + 5.0 / 3600.0));
    let orch = Orchestrator::new(config, db.clone()).with_solver(solver);

    for (paths, cal_type) in [
        (&biases, CalibrationType::Bias),
        (&darks, CalibrationType::Dark),
        (&flats, CalibrationType::Flat),
    ] {
        let masters = orch.make_masters(paths, cal_type, &NoOpReporter).unwrap();
        assert_eq!(masters.len(), 1, "{cal_type} masters");
    }
    let dark = db.masters(CalibrationType::Dark, CAMERA).unwrap();
    let dark_master = read_frame(&dark[0].path).unwrap();
    let rate = dark_master.data.iter().map(|&v| v as f64).sum::<f64>() / dark_master.data.len() as f64;
    assert!((rate - 2.0).abs() < 0.2, "dark rate {rate}");

    let output = match orch.reduce_file(&science).unwrap() {
        FileOutcome::Reduced { output, is_bad: false } => output,
        other => panic!("expected a good reduced frame, got {other:?}"),
    };
    let reduced = read_frame(&output).unwrap();

    for key in ["L1IDBIAS", "L1IDDARK", "L1IDFLAT"] {
        let name = reduced.header.get_str(key).unwrap_or_default();
        assert!(name.starts_with("lsc-fa15-20240301-"), "{key} = {name:?}");
    }
    let (sky, _) = sky_background(&reduced).unwrap();
    assert!((sky - 1000.0).abs() < 10.0, "sky {sky}");

    assert!(reduced.header.get_f64("NSOURCES").unwrap() >= 2.0);
    assert_eq!(reduced.header.get_f64("WCSERR"), Some(0.0));
    let offset = reduced.header.get_f64("PNTOFST").unwrap();
    assert!((offset - 5.0).abs() < 1e-6, "offset {offset}");
    assert!(!reduced.is_bad);

    let statuses = stage_statuses(&read_header(&output).unwrap());
    assert_eq!(statuses, reduced.status);
    for stage in [
        "BiasSubtractor",
        "DarkSubtractor",
        "FlatDivider",
        "SourceDetector",
        "PlateSolver",
        "PointingTest",
    ] {
        assert_eq!(statuses.get(stage), Some(&StageStatus::Ok), "{stage}");
    }
    assert!(statuses.contains_key("PatternNoiseDetector"));
}

#[test]
fn test_science_frame_is_reduced_once() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let biases = write_biases(&raw, 5);
    let science = write_science(&raw, "lsc-fa15-20240302-0007-e00.fits");

    let db = Arc::new(Database::in_memory());
    register_camera(&db, true);
    let publisher = Arc::new(ChannelPublisher::new());
    let published = publisher.subscribe();
    let orch = Orchestrator::new(config_for(tmp.path()), db.clone()).with_publisher(publisher.clone());

    let masters = orch
        .make_masters(&biases, CalibrationType::Bias, &NoOpReporter)
        .unwrap();
    assert_eq!(masters.len(), 1);
    assert_eq!(published.try_recv().unwrap(), masters[0].path);

    assert!(orch.need_to_process(&science).unwrap());
    let (output, is_bad) = match orch.reduce_file(&science).unwrap() {
        FileOutcome::Reduced { output, is_bad } => (output, is_bad),
        other => panic!("expected a reduced frame, got {other:?}"),
    };
    assert!(!is_bad);
    assert_eq!(
        output,
        tmp.path()
            .join("processed/lsc/fa15/20240302/processed/lsc-fa15-20240302-0007-e91.fits")
    );
    assert_eq!(published.try_recv().unwrap(), output);

    let reduced = read_frame(&output).unwrap();
    assert_eq!(
        reduced.header.get_str("L1IDBIAS"),
        Some("lsc-fa15-20240301-bias-bin1x1.fits")
    );
    // 800 on a 500 bias: both the master pattern and its level come off.
    let mean = reduced.data.iter().map(|&v| v as f64).sum::<f64>() / reduced.data.len() as f64;
    assert!((mean - 300.0).abs() < 5.0, "mean {mean}");
    let bias_level = reduced.header.get_f64("BIASLVL").unwrap();
    assert!((bias_level - 500.0).abs() < 2.0, "bias level {bias_level}");

    let record = orch.tracker().record(&science).unwrap().unwrap();
    assert!(record.success);
    assert_eq!(record.tries, 0);

    assert!(!orch.need_to_process(&science).unwrap());
    assert!(matches!(orch.reduce_file(&science).unwrap(), FileOutcome::Skipped));
}

#[test]
fn test_frame_without_master_is_written_as_bad() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let science = write_science(&raw, "lsc-fa15-20240302-0008-e00.fits");

    let db = Arc::new(Database::in_memory());
    register_camera(&db, true);
    let orch = Orchestrator::new(config_for(tmp.path()), db);

    match orch.reduce_file(&science).unwrap() {
        FileOutcome::Reduced { output, is_bad } => {
            assert!(is_bad);
            assert!(read_frame(&output).unwrap().is_bad);
        }
        other => panic!("expected a reduced frame, got {other:?}"),
    }
    assert!(orch.tracker().record(&science).unwrap().unwrap().success);
}

#[test]
fn test_unknown_or_unschedulable_instrument_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let science = write_science(&raw, "lsc-fa15-20240302-0009-e00.fits");

    let db = Arc::new(Database::in_memory());
    let orch = Orchestrator::new(config_for(tmp.path()), db.clone());
    assert!(!orch.need_to_process(&science).unwrap());
    assert!(matches!(orch.reduce_file(&science).unwrap(), FileOutcome::Skipped));

    register_camera(&db, false);
    assert!(!orch.need_to_process(&science).unwrap());

    let mut config = config_for(tmp.path());
    config.processing.ignore_schedulability = true;
    let orch = Orchestrator::new(config, db);
    assert!(orch.need_to_process(&science).unwrap());
}

#[test]
fn test_non_fits_names_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("frame.jpg");
    std::fs::write(&path, b"jpeg").unwrap();
    let orch = Orchestrator::new(config_for(tmp.path()), Arc::new(Database::in_memory()));
    assert!(!orch.need_to_process(&path).unwrap());
}

#[test]
fn test_fatal_failures_use_up_retries() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let biases = write_biases(&raw, 5);
    let science = write_science(&raw, "lsc-fa15-20240302-0010-e00.fits");

    let db = Arc::new(Database::in_memory());
    register_camera(&db, true);
    let orch = Orchestrator::new(config_for(tmp.path()), db.clone());
    let masters = orch
        .make_masters(&biases, CalibrationType::Bias, &NoOpReporter)
        .unwrap();
    // The published master becomes unreadable.
    std::fs::write(&masters[0].path, b"garbage").unwrap();

    let orch = Orchestrator::new(config_for(tmp.path()), db);
    for _ in 0..2 {
        assert!(matches!(orch.reduce_file(&science).unwrap(), FileOutcome::Failed(_)));
    }
    let record = orch.tracker().record(&science).unwrap().unwrap();
    assert_eq!(record.tries, 2);
    assert!(!record.success);
    assert!(matches!(orch.reduce_file(&science).unwrap(), FileOutcome::Skipped));
    assert_eq!(
        orch.tracker()
            .decide(&science, &record.checksum, 2)
            .unwrap(),
        darkroom_core::tracking::Decision::Skip(SkipReason::RetriesExhausted)
    );
}

// ---------------------------------------------------------------------------
// Directory runs
// ---------------------------------------------------------------------------

#[test]
fn test_reduce_directory_summarises_outcomes() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    write_science(&raw, "lsc-fa15-20240302-0011-e00.fits");
    write_science(&raw, "lsc-fa15-20240302-0012-e00.fits");
    std::fs::write(raw.join("notes.txt"), "skip me").unwrap();

    let db = Arc::new(Database::in_memory());
    register_camera(&db, true);
    let orch = Orchestrator::new(config_for(tmp.path()), db);

    let summary = orch.reduce_directory(&raw, &NoOpReporter).unwrap();
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.reduced(), 2);
    assert_eq!(summary.failed(), 0);

    let again = orch.reduce_directory(&raw, &NoOpReporter).unwrap();
    assert_eq!(again.skipped(), 2);
}

#[test]
fn test_cancelled_directory_run_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    write_science(&raw, "lsc-fa15-20240302-0013-e00.fits");

    let db = Arc::new(Database::in_memory());
    register_camera(&db, true);
    let cancel = CancelToken::new();
    cancel.cancel();
    let orch = Orchestrator::new(config_for(tmp.path()), db).with_cancel(cancel);

    let summary = orch.reduce_directory(&raw, &NoOpReporter).unwrap();
    assert_eq!(summary.skipped(), 1);
    assert!(!tmp.path().join("processed").exists());
}

/// Keeps the phases a batch run announces, with their sizes.
#[derive(Default)]
struct PhaseLog(Mutex<Vec<(PipelineStage, Option<usize>)>>);

impl ProgressReporter for PhaseLog {
    fn begin_stage(&self, stage: PipelineStage, total_items: Option<usize>) {
        self.0.lock().unwrap().push((stage, total_items));
    }
}

#[test]
fn test_batch_runs_report_their_phases() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("raw");
    let biases = write_biases(&raw, 5);

    let db = Arc::new(Database::in_memory());
    register_camera(&db, true);
    let orch = Orchestrator::new(config_for(tmp.path()), db);

    let log = PhaseLog::default();
    orch.make_masters(&biases, CalibrationType::Bias, &log).unwrap();
    assert_eq!(
        *log.0.lock().unwrap(),
        vec![
            (PipelineStage::Reducing, Some(5)),
            (PipelineStage::Grouping, None),
            (PipelineStage::Combining, Some(1)),
            (PipelineStage::Writing, Some(1)),
        ]
    );

    // A file that fails the gate is reported but not reduced.
    let science_dir = tmp.path().join("science");
    write_science(&science_dir, "lsc-fa15-20240302-0014-e00.fits");
    std::fs::write(science_dir.join("notes.fits"), "not a frame").unwrap();
    let log = PhaseLog::default();
    let summary = orch.reduce_directory(&science_dir, &log).unwrap();
    assert_eq!(
        *log.0.lock().unwrap(),
        vec![(PipelineStage::Gating, Some(2)), (PipelineStage::Reducing, Some(1))]
    );
    assert_eq!(summary.reduced(), 1);
    assert_eq!(summary.failed(), 1);
}
