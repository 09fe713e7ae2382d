use chrono::NaiveDate;
use tracing::debug;

use crate::error::{ReductionError, Result};
use crate::group::GroupKey;
use crate::store::CalibrationStore;

use super::types::{CalibrationType, MasterCalibration};

/// Find the stored master closest in time to `target`.
///
/// Candidates must match `cal_type`, `instrument` and `group_key` exactly.
/// They are ranked by absolute day distance; ties go to the earliest created
/// record, then the lowest id.
pub fn select_master(
    store: &dyn CalibrationStore,
    cal_type: CalibrationType,
    instrument: &str,
    group_key: &GroupKey,
    target: NaiveDate,
) -> Result<MasterCalibration> {
    let candidates: Vec<MasterCalibration> = store
        .masters(cal_type, instrument)?
        .into_iter()
        .filter(|m| &m.group_key == group_key)
        .collect();

    let best = closest_master(candidates, target).ok_or_else(|| {
        ReductionError::NoCalibrationFound {
            cal_type,
            instrument: instrument.to_string(),
            date: target,
        }
    })?;

    debug!(
        cal_type = %cal_type,
        master = %best.path.display(),
        dayobs = %best.dayobs,
        "Selected master calibration"
    );
    Ok(best)
}

/// Rank an already-filtered candidate set by date distance.
pub fn closest_master(
    candidates: Vec<MasterCalibration>,
    target: NaiveDate,
) -> Option<MasterCalibration> {
    candidates.into_iter().min_by(|a, b| {
        let da = (target - a.dayobs).num_days().abs();
        let db = (target - b.dayobs).num_days().abs();
        da.cmp(&db)
            .then(a.created.cmp(&b.created))
            .then(a.id.cmp(&b.id))
    })
}
