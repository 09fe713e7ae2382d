//! Plate solving through an external astrometry service.
//!
//! The service receives the frame's source catalog and an initial pointing
//! guess and answers with a linear WCS, which is stored in the header as
//! returned. `WCSERR` records the outcome: 0 for a solution, 4 otherwise.

mod http;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::{WCS_FAILED, WCS_SUCCESS};
use crate::error::{ReductionError, Result};
use crate::frame::{Frame, Header};

pub use http::HttpPlateSolver;

/// Keywords copied from a solution into the frame header.
pub const WCS_KEYWORDS: [&str; 10] = [
    "CTYPE1", "CTYPE2", "CRPIX1", "CRPIX2", "CRVAL1", "CRVAL2", "CD1_1", "CD1_2", "CD2_1",
    "CD2_2",
];

/// Catalog payload posted to the service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveRequest {
    #[serde(rename = "X")]
    pub x: Vec<f64>,
    #[serde(rename = "Y")]
    pub y: Vec<f64>,
    #[serde(rename = "FLUX")]
    pub flux: Vec<f64>,
    pub pixel_scale: f64,
    pub naxis: u32,
    pub naxis1: usize,
    pub naxis2: usize,
    pub ra: f64,
    pub dec: f64,
    pub statistics: bool,
}

/// Linear WCS returned by a successful solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WcsSolution {
    pub ctype1: String,
    pub ctype2: String,
    pub crpix1: f64,
    pub crpix2: f64,
    pub crval1: f64,
    pub crval2: f64,
    pub cd1_1: f64,
    pub cd1_2: f64,
    pub cd2_1: f64,
    pub cd2_2: f64,
}

impl WcsSolution {
    pub fn apply(&self, header: &mut Header) {
        header.set("CTYPE1", self.ctype1.clone());
        header.set("CTYPE2", self.ctype2.clone());
        header.set("CRPIX1", self.crpix1);
        header.set("CRPIX2", self.crpix2);
        header.set("CRVAL1", self.crval1);
        header.set("CRVAL2", self.crval2);
        header.set("CD1_1", self.cd1_1);
        header.set("CD1_2", self.cd1_2);
        header.set("CD2_1", self.cd2_1);
        header.set("CD2_2", self.cd2_2);
    }

    /// Reference sky position (ra, dec) in degrees.
    pub fn center(&self) -> (f64, f64) {
        (self.crval1, self.crval2)
    }
}

/// Service answer. A failed solve carries a message and, when the service
/// got far enough to assign one, a solve id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SolveResponse {
    #[serde(default)]
    pub solved: bool,
    #[serde(flatten)]
    pub solution: Option<WcsSolution>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub solve_id: Option<serde_json::Value>,
}

impl SolveResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

pub trait PlateSolver: Send + Sync {
    fn solve(&self, request: &SolveRequest) -> Result<SolveResponse>;
}

/// Solver used when no service is configured; every solve fails.
pub struct NullPlateSolver;

impl PlateSolver for NullPlateSolver {
    fn solve(&self, _request: &SolveRequest) -> Result<SolveResponse> {
        Ok(SolveResponse::failed("no astrometry service configured"))
    }
}

/// What happened when solving one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveOutcome {
    Solved(WcsSolution),
    Failed(String),
}

impl SolveOutcome {
    pub fn wcserr(&self) -> i64 {
        match self {
            Self::Solved(_) => WCS_SUCCESS,
            Self::Failed(_) => WCS_FAILED,
        }
    }
}

/// Build the service payload for `frame`.
pub fn build_request(frame: &Frame, default_pixel_scale: f64) -> Result<SolveRequest> {
    let (ra, dec) = frame.pointing.ok_or(ReductionError::MissingPointing)?;
    let catalog = frame
        .catalog
        .as_ref()
        .filter(|c| !c.is_empty())
        .ok_or(ReductionError::MissingCatalog)?;

    Ok(SolveRequest {
        x: catalog.iter().map(|s| s.x).collect(),
        y: catalog.iter().map(|s| s.y).collect(),
        flux: catalog.iter().map(|s| s.flux).collect(),
        pixel_scale: frame.pixel_scale.unwrap_or(default_pixel_scale),
        naxis: 2,
        naxis1: frame.width(),
        naxis2: frame.height(),
        ra,
        dec,
        statistics: false,
    })
}

/// Solve `frame` and record the result in its header. Never fails: service
/// errors become `WCSERR = 4`.
pub fn solve_frame(frame: &mut Frame, solver: &dyn PlateSolver, default_pixel_scale: f64) -> SolveOutcome {
    let outcome = match build_request(frame, default_pixel_scale) {
        Err(e) => {
            warn!(error = %e, "Skipping WCS solution");
            SolveOutcome::Failed(e.to_string())
        }
        Ok(request) => match solver.solve(&request) {
            Err(e) => {
                warn!(error = %e, "Astrometry service unreachable");
                SolveOutcome::Failed(e.to_string())
            }
            Ok(SolveResponse {
                solved: true,
                solution: Some(solution),
                ..
            }) => SolveOutcome::Solved(solution),
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "WCS solution failed".to_string());
                warn!(
                    message = %message,
                    solve_id = ?response.solve_id,
                    "WCS solution failed"
                );
                SolveOutcome::Failed(message)
            }
        },
    };

    if let SolveOutcome::Solved(solution) = &outcome {
        solution.apply(&mut frame.header);
    }
    frame.header.set("WCSERR", outcome.wcserr());
    info!(wcserr = outcome.wcserr(), "Attempted WCS solve");
    outcome
}
