#[allow(dead_code)]
mod common;

use chrono::{Duration, Utc};

use darkroom_core::calibration::select::closest_master;
use darkroom_core::calibration::select_master;
use darkroom_core::calibration::types::{CalibrationType, MasterCalibration};
use darkroom_core::error::ReductionError;
use darkroom_core::frame::ObsType;
use darkroom_core::store::{CalibrationStore, Database};

use common::{date, key_for, make_frame, new_master, CAMERA};

fn record(id: u64, dayobs: chrono::NaiveDate, created_offset_secs: i64) -> MasterCalibration {
    let frame = make_frame(ObsType::Bias, 4, 4, 0.0);
    MasterCalibration {
        id,
        cal_type: CalibrationType::Bias,
        instrument: CAMERA.into(),
        group_key: key_for(&frame, CalibrationType::Bias),
        dayobs,
        path: format!("bias-{id}.fits").into(),
        created: Utc::now() + Duration::seconds(created_offset_secs),
        mean_level: 0.0,
        readnoise: 0.0,
        frame_count: 5,
    }
}

// ---------------------------------------------------------------------------
// select_master
// ---------------------------------------------------------------------------

#[test]
fn test_selects_closest_in_time() {
    let db = Database::in_memory();
    let frame = make_frame(ObsType::Science, 4, 4, 0.0);
    for (day, name) in [(1, "a.fits"), (10, "b.fits"), (20, "c.fits")] {
        db.publish_master(new_master(&frame, CalibrationType::Bias, date(2024, 3, day), name))
            .unwrap();
    }

    let key = key_for(&frame, CalibrationType::Bias);
    let best = select_master(&db, CalibrationType::Bias, CAMERA, &key, date(2024, 3, 12)).unwrap();
    assert_eq!(best.filename(), Some("b.fits"));

    let best = select_master(&db, CalibrationType::Bias, CAMERA, &key, date(2024, 2, 1)).unwrap();
    assert_eq!(best.filename(), Some("a.fits"));
}

#[test]
fn test_masters_in_other_groups_are_ignored() {
    let db = Database::in_memory();
    let frame = make_frame(ObsType::Science, 4, 4, 0.0);
    let mut binned = frame.clone();
    binned.attributes.binning = "2 2".into();

    db.publish_master(new_master(&binned, CalibrationType::Bias, date(2024, 3, 1), "binned.fits"))
        .unwrap();
    db.publish_master(new_master(&frame, CalibrationType::Bias, date(2024, 1, 1), "unbinned.fits"))
        .unwrap();

    let key = key_for(&frame, CalibrationType::Bias);
    let best = select_master(&db, CalibrationType::Bias, CAMERA, &key, date(2024, 3, 1)).unwrap();
    assert_eq!(best.filename(), Some("unbinned.fits"));
}

#[test]
fn test_other_type_and_instrument_are_ignored() {
    let db = Database::in_memory();
    let frame = make_frame(ObsType::Science, 4, 4, 0.0);
    db.publish_master(new_master(&frame, CalibrationType::Dark, date(2024, 3, 1), "dark.fits"))
        .unwrap();
    let mut other = new_master(&frame, CalibrationType::Bias, date(2024, 3, 1), "other.fits");
    other.instrument = "kb99".into();
    db.publish_master(other).unwrap();

    let key = key_for(&frame, CalibrationType::Bias);
    let err = select_master(&db, CalibrationType::Bias, CAMERA, &key, date(2024, 3, 1)).unwrap_err();
    assert!(matches!(
        err,
        ReductionError::NoCalibrationFound {
            cal_type: CalibrationType::Bias,
            ..
        }
    ));
}

#[test]
fn test_no_master_is_a_data_error() {
    let db = Database::in_memory();
    let frame = make_frame(ObsType::Science, 4, 4, 0.0);
    let key = key_for(&frame, CalibrationType::Flat);
    let err = select_master(&db, CalibrationType::Flat, CAMERA, &key, date(2024, 3, 1)).unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains(CAMERA));
}

// ---------------------------------------------------------------------------
// Tie-breaking
// ---------------------------------------------------------------------------

#[test]
fn test_equal_distance_prefers_earliest_created() {
    let target = date(2024, 3, 3);
    let before = record(2, date(2024, 3, 1), -60);
    let after = record(1, date(2024, 3, 5), 0);
    let best = closest_master(vec![after, before], target).unwrap();
    assert_eq!(best.id, 2);
}

#[test]
fn test_equal_distance_and_creation_prefers_lowest_id() {
    let target = date(2024, 3, 3);
    let mut a = record(7, date(2024, 3, 1), 0);
    let mut b = record(3, date(2024, 3, 5), 0);
    b.created = a.created;
    a.path = "a.fits".into();
    let best = closest_master(vec![a, b], target).unwrap();
    assert_eq!(best.id, 3);
}

#[test]
fn test_closest_of_nothing_is_none() {
    assert!(closest_master(Vec::new(), date(2024, 3, 3)).is_none());
}
