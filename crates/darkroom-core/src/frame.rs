use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::consts::DEFAULT_SATURATION;
use crate::error::{ReductionError, Result};

/// Observation type of a raw exposure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObsType {
    Bias,
    Dark,
    Flat,
    Science,
}

impl FromStr for ObsType {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BIAS" => Ok(Self::Bias),
            "DARK" => Ok(Self::Dark),
            "SKYFLAT" | "LAMPFLAT" | "FLAT" => Ok(Self::Flat),
            "EXPOSE" | "STANDARD" | "SCIENCE" => Ok(Self::Science),
            other => Err(ReductionError::UnknownObsType(other.to_string())),
        }
    }
}

impl fmt::Display for ObsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bias => write!(f, "BIAS"),
            Self::Dark => write!(f, "DARK"),
            Self::Flat => write!(f, "SKYFLAT"),
            Self::Science => write!(f, "EXPOSE"),
        }
    }
}

/// Where a frame came from: site, camera, observing night and file name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId {
    pub site: String,
    pub instrument: String,
    pub epoch: NaiveDate,
    pub filename: String,
}

/// Instrument configuration fields used to group frames and match calibrations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupAttributes {
    pub configuration_mode: String,
    /// On-chip binning, e.g. `"2 2"`.
    pub binning: String,
    pub filter: String,
    /// Exposure time in seconds.
    pub exposure_time: f64,
}

impl Default for GroupAttributes {
    fn default() -> Self {
        Self {
            configuration_mode: "full_frame".into(),
            binning: "1 1".into(),
            filter: "air".into(),
            exposure_time: 0.0,
        }
    }
}

/// A single header value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Ordered keyword/value header. Keywords are stored upper-case.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let key = key.to_ascii_uppercase();
        self.cards.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| ReductionError::MissingHeader(key.to_string()))
    }

    /// Insert or replace a keyword, keeping its original position on replace.
    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        let key = key.to_ascii_uppercase();
        let value = value.into();
        match self.cards.iter_mut().find(|(k, _)| *k == key) {
            Some(card) => card.1 = value,
            None => self.cards.push((key, value)),
        }
    }

    /// Keep only the cards whose keyword satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.cards.retain(|(k, _)| keep(k));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// A detected source handed to the plate solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
}

/// Outcome recorded by one stage on one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum StageStatus {
    Ok,
    /// The stage ran and found a problem; the frame continues.
    Flagged(String),
    /// The stage did not apply or could not run; the frame continues.
    Skipped(String),
    /// The stage aborted the run.
    Failed(String),
}

impl StageStatus {
    /// `Stage:Ok` or `Stage:<Flagged|Skipped|Failed>:reason`.
    pub fn encode(&self, stage: &str) -> String {
        match self {
            Self::Ok => format!("{stage}:Ok"),
            Self::Flagged(reason) => format!("{stage}:Flagged:{reason}"),
            Self::Skipped(reason) => format!("{stage}:Skipped:{reason}"),
            Self::Failed(reason) => format!("{stage}:Failed:{reason}"),
        }
    }

    /// Inverse of [`StageStatus::encode`]; `None` for anything else.
    pub fn decode(text: &str) -> Option<(String, Self)> {
        let mut parts = text.splitn(3, ':');
        let stage = parts.next()?.trim();
        let kind = parts.next()?.trim();
        let reason = parts.next().unwrap_or_default().trim().to_string();
        if stage.is_empty() {
            return None;
        }
        let status = match kind {
            "Ok" => Self::Ok,
            "Flagged" => Self::Flagged(reason),
            "Skipped" => Self::Skipped(reason),
            "Failed" => Self::Failed(reason),
            _ => return None,
        };
        Some((stage.to_string(), status))
    }
}

/// One instrument exposure with its pixel, uncertainty and mask planes.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: FrameId,
    pub obstype: ObsType,
    pub attributes: GroupAttributes,
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    /// 1-sigma per-pixel uncertainty, same shape as `data`.
    pub uncertainty: Array2<f32>,
    /// Bad pixel mask; non-zero marks a bad pixel.
    pub mask: Array2<u8>,
    pub readnoise: f64,
    pub saturation: f64,
    /// Scalar summary level (bias level, flat level) set by the level stages.
    pub level: Option<f64>,
    /// Requested pointing (ra, dec) in degrees.
    pub pointing: Option<(f64, f64)>,
    /// Pixel scale in arcsec/pixel.
    pub pixel_scale: Option<f64>,
    pub catalog: Option<Vec<Source>>,
    pub header: Header,
    pub is_bad: bool,
    pub status: BTreeMap<String, StageStatus>,
}

impl Frame {
    /// Build a frame with zero uncertainty and an empty mask.
    pub fn new(id: FrameId, obstype: ObsType, attributes: GroupAttributes, data: Array2<f32>) -> Self {
        let dim = data.dim();
        Self {
            id,
            obstype,
            attributes,
            uncertainty: Array2::zeros(dim),
            mask: Array2::zeros(dim),
            data,
            readnoise: 0.0,
            saturation: DEFAULT_SATURATION,
            level: None,
            pointing: None,
            pixel_scale: None,
            catalog: None,
            header: Header::new(),
            is_bad: false,
            status: BTreeMap::new(),
        }
    }

    /// Build a frame from a parsed header and its primary data array.
    ///
    /// `OBSTYPE`, `SITEID`, `INSTRUME` and `DAY-OBS` are required; an
    /// unrecognised `OBSTYPE` is the fatal "unknown frame class" error.
    pub fn from_header(header: Header, data: Array2<f32>, filename: &str) -> Result<Self> {
        let obstype: ObsType = header.require_str("OBSTYPE")?.parse()?;
        let site = header.require_str("SITEID")?.trim().to_string();
        let instrument = header.require_str("INSTRUME")?.trim().to_string();
        let epoch = parse_dayobs(header.require_str("DAY-OBS")?)?;

        let text = |key: &str, default: &str| {
            header
                .get_str(key)
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| default.to_string())
        };
        let attributes = GroupAttributes {
            configuration_mode: text("CONFMODE", "full_frame"),
            binning: text("CCDSUM", "1 1"),
            filter: text("FILTER", "air"),
            exposure_time: header.get_f64("EXPTIME").unwrap_or(0.0),
        };

        let id = FrameId {
            site,
            instrument,
            epoch,
            filename: filename.to_string(),
        };
        let mut frame = Frame::new(id, obstype, attributes, data);
        frame.readnoise = header.get_f64("RDNOISE").unwrap_or(0.0);
        frame.saturation = header.get_f64("SATURATE").unwrap_or(DEFAULT_SATURATION);
        frame.pixel_scale = header.get_f64("PIXSCALE");
        frame.pointing = match (header.get_f64("RA"), header.get_f64("DEC")) {
            (Some(ra), Some(dec)) if ra.is_finite() && dec.is_finite() => Some((ra, dec)),
            _ => None,
        };
        frame.header = header;
        frame.init_poisson_uncertainty();
        Ok(frame)
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Uncertainty from read noise and Poisson noise of the current data.
    pub fn init_poisson_uncertainty(&mut self) {
        let rn2 = (self.readnoise * self.readnoise) as f32;
        self.uncertainty = self.data.mapv(|v| (rn2 + v.max(0.0)).sqrt());
    }

    /// Mark the frame bad and record why.
    pub fn flag_bad(&mut self, stage: &str, reason: impl Into<String>) {
        self.is_bad = true;
        self.status
            .insert(stage.to_string(), StageStatus::Flagged(reason.into()));
    }

    pub fn record(&mut self, stage: &str, status: StageStatus) {
        self.status.insert(stage.to_string(), status);
    }

    /// Tracing span carrying the frame's identity as structured fields.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "frame",
            filename = %self.id.filename,
            site = %self.id.site,
            instrument = %self.id.instrument,
            epoch = %self.id.epoch.format("%Y%m%d"),
            obstype = %self.obstype,
            filter = %self.attributes.filter,
        )
    }
}

/// Parse a `DAY-OBS` value, accepting `YYYYMMDD` and `YYYY-MM-DD`.
pub fn parse_dayobs(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| ReductionError::MissingHeader(format!("DAY-OBS ({value})")))
}
