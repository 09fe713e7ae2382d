use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ReductionError, Result};
use crate::frame::Frame;

/// A frame field that frames can be grouped on.
///
/// Names are resolved once, when configuration is loaded, so extraction at
/// grouping time cannot fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GroupAttribute {
    ConfigurationMode,
    Binning,
    Filter,
    ExposureTime,
    Nx,
    Ny,
}

impl GroupAttribute {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigurationMode => "configuration_mode",
            Self::Binning => "binning",
            Self::Filter => "filter",
            Self::ExposureTime => "exptime",
            Self::Nx => "nx",
            Self::Ny => "ny",
        }
    }

    pub fn extract(&self, frame: &Frame) -> AttributeValue {
        match self {
            Self::ConfigurationMode => AttributeValue::Text(frame.attributes.configuration_mode.clone()),
            Self::Binning => AttributeValue::Text(frame.attributes.binning.clone()),
            Self::Filter => AttributeValue::Text(frame.attributes.filter.clone()),
            Self::ExposureTime => {
                AttributeValue::Millis((frame.attributes.exposure_time * 1000.0).round() as i64)
            }
            Self::Nx => AttributeValue::Size(frame.width()),
            Self::Ny => AttributeValue::Size(frame.height()),
        }
    }
}

impl FromStr for GroupAttribute {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "configuration_mode" | "confmode" => Ok(Self::ConfigurationMode),
            "binning" | "ccdsum" => Ok(Self::Binning),
            "filter" => Ok(Self::Filter),
            "exptime" | "exposure_time" => Ok(Self::ExposureTime),
            "nx" => Ok(Self::Nx),
            "ny" => Ok(Self::Ny),
            other => Err(ReductionError::Config(format!(
                "unknown group attribute '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for GroupAttribute {
    type Error = ReductionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GroupAttribute> for String {
    fn from(value: GroupAttribute) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for GroupAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Extracted attribute value; totally ordered so it can key a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Size(usize),
    /// Exposure time at millisecond resolution.
    Millis(i64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Size(n) => write!(f, "{n}"),
            Self::Millis(ms) => write!(f, "{:.3}s", *ms as f64 / 1000.0),
        }
    }
}

/// Ordered attribute/value pairs identifying a group of compatible frames.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey(pub Vec<(GroupAttribute, AttributeValue)>);

impl GroupKey {
    pub fn of(frame: &Frame, attributes: &[GroupAttribute]) -> Self {
        Self(
            attributes
                .iter()
                .map(|attr| (*attr, attr.extract(frame)))
                .collect(),
        )
    }

    pub fn get(&self, attribute: GroupAttribute) -> Option<&AttributeValue> {
        self.0.iter().find(|(a, _)| *a == attribute).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (attr, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attr}={value}")?;
        }
        Ok(())
    }
}

/// Parse a list of attribute names, failing on the first unknown one.
pub fn parse_attributes<S: AsRef<str>>(names: &[S]) -> Result<Vec<GroupAttribute>> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}
