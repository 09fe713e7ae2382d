use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::compare::ComparerParams;
use crate::calibration::types::CalibrationType;
use crate::consts::{
    DEFAULT_ASTROMETRY_TIMEOUT_SECS, DEFAULT_ASTROMETRY_URL, DEFAULT_MAX_TRIES, DEFAULT_MIN_IMAGES,
};
use crate::detection::DetectionParams;
use crate::error::{ReductionError, Result};
use crate::frame::ObsType;
use crate::group::GroupAttribute;
use crate::quality::QualityParams;

use super::stage::StageStep;

/// Complete reduction configuration, loaded from TOML. Every section is
/// optional and falls back to its defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub processing: ProcessingConfig,
    pub calibration: CalibrationConfig,
    pub comparer: ComparerParams,
    pub quality: QualityParams,
    pub astrometry: AstrometryConfig,
    pub detection: DetectionParams,
    pub stages: StageLists,
}

impl ReductionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReductionError::Config(e.to_string()))
    }

    /// Reject values that would make every run fail later.
    pub fn validate(&self) -> Result<()> {
        if self.processing.max_tries == 0 {
            return Err(ReductionError::Config("processing.max_tries must be at least 1".into()));
        }
        if self.calibration.min_images == 0 {
            return Err(ReductionError::Config(
                "calibration.min_images must be at least 1".into(),
            ));
        }
        if !(self.comparer.signal_to_noise_threshold > 0.0) {
            return Err(ReductionError::Config(
                "comparer.signal_to_noise_threshold must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.comparer.acceptable_fraction) {
            return Err(ReductionError::Config(
                "comparer.acceptable_fraction must lie in [0, 1]".into(),
            ));
        }
        for obstype in [ObsType::Bias, ObsType::Dark, ObsType::Flat, ObsType::Science] {
            if self.stages.for_obstype(obstype).is_empty() {
                return Err(ReductionError::Config(format!(
                    "stage list for {obstype} is empty"
                )));
            }
        }
        if !(self.detection.threshold_sigma > 0.0) {
            return Err(ReductionError::Config(
                "detection.threshold_sigma must be positive".into(),
            ));
        }
        if self.detection.min_area == 0 {
            return Err(ReductionError::Config("detection.min_area must be at least 1".into()));
        }
        if self.astrometry.timeout_secs == 0 {
            return Err(ReductionError::Config("astrometry.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Attempts per checksum before a file is no longer scheduled.
    pub max_tries: u32,
    /// Process frames from instruments that are not marked schedulable.
    pub ignore_schedulability: bool,
    /// Root of the processed-data tree.
    pub processed_path: PathBuf,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            ignore_schedulability: false,
            processed_path: PathBuf::from("processed"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub min_images: usize,
    pub bias_group_by: Vec<GroupAttribute>,
    pub dark_group_by: Vec<GroupAttribute>,
    pub flat_group_by: Vec<GroupAttribute>,
}

impl CalibrationConfig {
    /// Attributes a master of `cal_type` is grouped and matched by.
    pub fn group_by(&self, cal_type: CalibrationType) -> &[GroupAttribute] {
        match cal_type {
            CalibrationType::Bias => &self.bias_group_by,
            CalibrationType::Dark => &self.dark_group_by,
            CalibrationType::Flat => &self.flat_group_by,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_images: DEFAULT_MIN_IMAGES,
            bias_group_by: CalibrationType::Bias.default_group_by(),
            dark_group_by: CalibrationType::Dark.default_group_by(),
            flat_group_by: CalibrationType::Flat.default_group_by(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AstrometryConfig {
    pub url: String,
    pub timeout_secs: u64,
    /// Pixel scale (arcsec/pixel) used when the header has none.
    pub pixel_scale: f64,
}

impl AstrometryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AstrometryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ASTROMETRY_URL.to_string(),
            timeout_secs: DEFAULT_ASTROMETRY_TIMEOUT_SECS,
            pixel_scale: 0.389,
        }
    }
}

/// Ordered stage list per observation type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StageLists {
    pub bias: Vec<StageStep>,
    pub dark: Vec<StageStep>,
    pub flat: Vec<StageStep>,
    pub science: Vec<StageStep>,
}

impl StageLists {
    pub fn for_obstype(&self, obstype: ObsType) -> &[StageStep] {
        match obstype {
            ObsType::Bias => &self.bias,
            ObsType::Dark => &self.dark,
            ObsType::Flat => &self.flat,
            ObsType::Science => &self.science,
        }
    }
}

impl Default for StageLists {
    fn default() -> Self {
        use StageStep::*;
        Self {
            bias: vec![
                HeaderSanity,
                SaturationTest,
                ThousandsTest,
                BiasLevelSubtractor,
                BiasComparer,
            ],
            dark: vec![
                HeaderSanity,
                SaturationTest,
                ThousandsTest,
                BiasSubtractor,
                DarkComparer,
                DarkNormalizer,
            ],
            flat: vec![
                HeaderSanity,
                SaturationTest,
                ThousandsTest,
                BiasSubtractor,
                DarkSubtractor,
                FlatNormalizer,
                PatternNoiseDetector,
                FlatComparer,
            ],
            science: vec![
                HeaderSanity,
                SaturationTest,
                ThousandsTest,
                BiasSubtractor,
                DarkSubtractor,
                FlatDivider,
                PatternNoiseDetector,
                SourceDetector,
                PlateSolver,
                PointingTest,
            ],
        }
    }
}
