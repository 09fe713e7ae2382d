use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReductionError, Result};
use crate::frame::{Frame, ObsType};
use crate::group::{GroupAttribute, GroupKey};

/// Kind of master calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CalibrationType {
    Bias,
    Dark,
    Flat,
}

impl CalibrationType {
    pub const ALL: [CalibrationType; 3] = [Self::Bias, Self::Dark, Self::Flat];

    /// Attributes a master of this type must share with the frames it calibrates.
    pub fn default_group_by(&self) -> Vec<GroupAttribute> {
        match self {
            Self::Bias | Self::Dark => {
                vec![GroupAttribute::ConfigurationMode, GroupAttribute::Binning]
            }
            Self::Flat => vec![
                GroupAttribute::ConfigurationMode,
                GroupAttribute::Binning,
                GroupAttribute::Filter,
            ],
        }
    }

    pub fn obstype(&self) -> ObsType {
        match self {
            Self::Bias => ObsType::Bias,
            Self::Dark => ObsType::Dark,
            Self::Flat => ObsType::Flat,
        }
    }

    pub fn from_obstype(obstype: ObsType) -> Option<Self> {
        match obstype {
            ObsType::Bias => Some(Self::Bias),
            ObsType::Dark => Some(Self::Dark),
            ObsType::Flat => Some(Self::Flat),
            ObsType::Science => None,
        }
    }

    /// Header keyword holding the level a frame of this type was scaled or
    /// offset by.
    pub fn level_keyword(&self) -> &'static str {
        match self {
            Self::Bias => "BIASLVL",
            Self::Dark => "DARKLVL",
            Self::Flat => "FLATLVL",
        }
    }

    /// Lower-case name used in file names.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Bias => "bias",
            Self::Dark => "dark",
            Self::Flat => "skyflat",
        }
    }
}

impl fmt::Display for CalibrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bias => write!(f, "BIAS"),
            Self::Dark => write!(f, "DARK"),
            Self::Flat => write!(f, "FLAT"),
        }
    }
}

impl FromStr for CalibrationType {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BIAS" => Ok(Self::Bias),
            "DARK" => Ok(Self::Dark),
            "FLAT" | "SKYFLAT" => Ok(Self::Flat),
            other => Err(ReductionError::Config(format!(
                "unknown calibration type '{other}'"
            ))),
        }
    }
}

/// Stored master calibration record. Never mutated once published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasterCalibration {
    /// Monotonic insertion id assigned by the store.
    pub id: u64,
    pub cal_type: CalibrationType,
    pub instrument: String,
    pub group_key: GroupKey,
    pub dayobs: NaiveDate,
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub mean_level: f64,
    pub readnoise: f64,
    pub frame_count: usize,
}

impl MasterCalibration {
    pub fn filename(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Freshly combined master: pixel planes plus summary statistics.
#[derive(Clone, Debug)]
pub struct CombinedMaster {
    pub cal_type: CalibrationType,
    pub group_key: GroupKey,
    pub frame: Frame,
    pub mean_level: f64,
    pub readnoise: f64,
    pub frame_count: usize,
}
