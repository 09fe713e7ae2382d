use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::calibration::types::CalibrationType;

#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Astrometry service error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("File changed while processing: {0}")]
    ChecksumChanged(PathBuf),

    #[error("No {cal_type} calibration found for {instrument} near {date}")]
    NoCalibrationFound {
        cal_type: CalibrationType,
        instrument: String,
        date: NaiveDate,
    },

    #[error("No initial pointing guess in header")]
    MissingPointing,

    #[error("No source catalog attached to frame")]
    MissingCatalog,

    #[error("Frames disagree on {0}")]
    InhomogeneousGroup(String),

    #[error("Shape mismatch: frame is {frame:?}, calibration is {calibration:?}")]
    ShapeMismatch {
        frame: (usize, usize),
        calibration: (usize, usize),
    },

    #[error("Missing header keyword: {0}")]
    MissingHeader(String),

    #[error("Unknown observation type: {0}")]
    UnknownObsType(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Store error: {0}")]
    Store(String),
}

/// How the pipeline reacts to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry later through the processing tracker.
    Transient,
    /// The frame or stage is flagged and the batch continues.
    Data,
    /// Abort the run for the affected unit.
    Fatal,
}

impl ReductionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) | Self::Http(_) | Self::ChecksumChanged(_) => ErrorClass::Transient,
            Self::NoCalibrationFound { .. }
            | Self::MissingPointing
            | Self::MissingCatalog
            | Self::InhomogeneousGroup(_)
            | Self::ShapeMismatch { .. }
            | Self::MissingHeader(_) => ErrorClass::Data,
            Self::UnknownObsType(_) | Self::Config(_) | Self::InvalidFits(_) | Self::Store(_) => {
                ErrorClass::Fatal
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class() != ErrorClass::Fatal
    }
}

impl From<serde_json::Error> for ReductionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<toml::de::Error> for ReductionError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReductionError>;
