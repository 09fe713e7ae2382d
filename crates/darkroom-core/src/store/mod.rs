//! Persistence boundary: instruments, master calibrations and per-file
//! processing records.

mod database;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::types::{CalibrationType, MasterCalibration};
use crate::error::Result;
use crate::tracking::ProcessingRecord;

pub use database::Database;

/// A camera on a telescope. Natural key: site, camera, enclosure, telescope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub site: String,
    pub camera: String,
    pub enclosure: String,
    pub telescope: String,
    pub camera_type: String,
    pub schedulable: bool,
}

impl Instrument {
    pub fn same_key(&self, other: &Instrument) -> bool {
        self.site == other.site
            && self.camera == other.camera
            && self.enclosure == other.enclosure
            && self.telescope == other.telescope
    }
}

/// Master calibration to be recorded; the store assigns id and creation time.
#[derive(Clone, Debug)]
pub struct NewMaster {
    pub cal_type: CalibrationType,
    pub instrument: String,
    pub group_key: crate::group::GroupKey,
    pub dayobs: chrono::NaiveDate,
    pub path: std::path::PathBuf,
    pub mean_level: f64,
    pub readnoise: f64,
    pub frame_count: usize,
}

pub trait InstrumentStore: Send + Sync {
    /// Insert, or update the row with the same natural key.
    fn upsert_instrument(&self, instrument: Instrument) -> Result<()>;

    fn instrument(&self, site: &str, camera: &str) -> Result<Option<Instrument>>;

    fn instruments(&self) -> Result<Vec<Instrument>>;
}

pub trait CalibrationStore: Send + Sync {
    /// All masters of one type for one instrument, in insertion order.
    fn masters(&self, cal_type: CalibrationType, instrument: &str) -> Result<Vec<MasterCalibration>>;

    /// Record a master whose pixel file is already fully written. A record
    /// for the same type, instrument, group key and day-obs is replaced and
    /// keeps its id.
    fn publish_master(&self, master: NewMaster) -> Result<MasterCalibration>;
}

pub trait ProcessingStore: Send + Sync {
    fn record(&self, path: &Path) -> Result<Option<ProcessingRecord>>;

    /// Run `update` on the record for `path` with the store locked for the
    /// whole read-modify-write, against other handles and processes too.
    fn transact(
        &self,
        path: &Path,
        update: &mut dyn FnMut(&mut Option<ProcessingRecord>),
    ) -> Result<()>;
}
