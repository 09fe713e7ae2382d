use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use darkroom_core::astrometry::{PlateSolver, SolveRequest, SolveResponse, WcsSolution};
use darkroom_core::calibration::types::{CalibrationType, MasterCalibration};
use darkroom_core::calibration::MasterLoader;
use darkroom_core::error::{ReductionError, Result};
use darkroom_core::frame::{Frame, FrameId, GroupAttributes, ObsType};
use darkroom_core::group::GroupKey;
use darkroom_core::io::write_frame;
use darkroom_core::store::NewMaster;

pub const SITE: &str = "lsc";
pub const CAMERA: &str = "fa15";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn frame_id(filename: &str, epoch: NaiveDate) -> FrameId {
    FrameId {
        site: SITE.into(),
        instrument: CAMERA.into(),
        epoch,
        filename: filename.into(),
    }
}

/// Constant frame with default attributes. Non-bias frames get a 30 s exposure.
pub fn make_frame(obstype: ObsType, h: usize, w: usize, fill: f32) -> Frame {
    let attributes = GroupAttributes {
        exposure_time: if obstype == ObsType::Bias { 0.0 } else { 30.0 },
        ..GroupAttributes::default()
    };
    Frame::new(
        frame_id("lsc-fa15-20240301-0001-x00.fits", date(2024, 3, 1)),
        obstype,
        attributes,
        Array2::from_elem((h, w), fill),
    )
}

/// Gaussian noise around `mean`; the uncertainty plane and read noise are
/// both set to `sigma`.
pub fn noisy_frame(
    rng: &mut StdRng,
    obstype: ObsType,
    h: usize,
    w: usize,
    mean: f32,
    sigma: f32,
) -> Frame {
    let mut frame = make_frame(obstype, h, w, 0.0);
    frame
        .data
        .mapv_inplace(|_| mean + sigma * rng.sample::<f32, _>(StandardNormal));
    frame.uncertainty.fill(sigma);
    frame.readnoise = sigma as f64;
    frame
}

/// Add a Gaussian star of peak `amplitude` centred on column `x`, row `y`
/// (array indices, so the FITS position is one more on each axis).
pub fn add_star(frame: &mut Frame, x: f64, y: f64, amplitude: f32, sigma: f64) {
    for ((row, col), v) in frame.data.indexed_iter_mut() {
        let r2 = (col as f64 - x).powi(2) + (row as f64 - y).powi(2);
        *v += amplitude * (-r2 / (2.0 * sigma * sigma)).exp() as f32;
    }
}

/// Raw-looking 32x32 frame: Gaussian level plus read noise, named `filename`.
pub fn raw_frame(
    rng: &mut StdRng,
    obstype: ObsType,
    filename: &str,
    epoch: NaiveDate,
    level: f32,
    readnoise: f32,
) -> Frame {
    let mut frame = noisy_frame(rng, obstype, 32, 32, level, readnoise);
    frame.id = frame_id(filename, epoch);
    frame.init_poisson_uncertainty();
    frame
}

/// Write `frame` under `dir` using its own file name.
pub fn write_raw(dir: &Path, frame: &Frame) -> PathBuf {
    let path = dir.join(&frame.id.filename);
    write_frame(frame, &path).unwrap();
    path
}

pub fn key_for(frame: &Frame, cal_type: CalibrationType) -> GroupKey {
    GroupKey::of(frame, &cal_type.default_group_by())
}

/// Master record to publish for frames shaped like `frame`.
pub fn new_master(frame: &Frame, cal_type: CalibrationType, dayobs: NaiveDate, path: &str) -> NewMaster {
    NewMaster {
        cal_type,
        instrument: CAMERA.into(),
        group_key: key_for(frame, cal_type),
        dayobs,
        path: PathBuf::from(path),
        mean_level: 0.0,
        readnoise: 0.0,
        frame_count: 5,
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Plate solver that answers every request with the same response.
pub struct FixedSolver {
    pub response: SolveResponse,
}

impl FixedSolver {
    pub fn solved_at(ra: f64, dec: f64) -> Self {
        Self {
            response: SolveResponse {
                solved: true,
                solution: Some(wcs_at(ra, dec)),
                ..SolveResponse::default()
            },
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: SolveResponse::failed(message),
        }
    }
}

impl PlateSolver for FixedSolver {
    fn solve(&self, _request: &SolveRequest) -> Result<SolveResponse> {
        Ok(self.response.clone())
    }
}

/// Plate solver whose service is never reachable.
pub struct UnreachableSolver;

impl PlateSolver for UnreachableSolver {
    fn solve(&self, _request: &SolveRequest) -> Result<SolveResponse> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into())
    }
}

pub fn wcs_at(ra: f64, dec: f64) -> WcsSolution {
    WcsSolution {
        ctype1: "RA---TAN".into(),
        ctype2: "DEC--TAN".into(),
        crpix1: 16.0,
        crpix2: 16.0,
        crval1: ra,
        crval2: dec,
        cd1_1: -1.08e-4,
        cd1_2: 0.0,
        cd2_1: 0.0,
        cd2_2: 1.08e-4,
    }
}

/// Master loader that finds every master file corrupt.
pub struct CorruptMasterLoader;

impl MasterLoader for CorruptMasterLoader {
    fn load(&self, master: &MasterCalibration) -> Result<Arc<Frame>> {
        Err(ReductionError::InvalidFits(format!(
            "{}: truncated",
            master.path.display()
        )))
    }
}
