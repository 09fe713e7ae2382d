use std::path::{Path, PathBuf};

use crate::calibration::types::CalibrationType;
use crate::consts::PROCESSED_SUFFIX;
use crate::frame::Frame;
use crate::group::{AttributeValue, GroupAttribute, GroupKey};

/// `<root>/<site>/<instrument>/<YYYYMMDD>/processed`
pub fn output_directory(root: &Path, frame: &Frame) -> PathBuf {
    root.join(&frame.id.site)
        .join(&frame.id.instrument)
        .join(frame.id.epoch.format("%Y%m%d").to_string())
        .join("processed")
}

/// Reduced file name: a raw `...00` stem becomes `...91`, any other stem gets
/// `-91` appended. Compression suffixes are dropped.
pub fn output_filename(raw_name: &str) -> String {
    let stem = raw_name
        .trim_end_matches(".fz")
        .trim_end_matches(".fits");
    match stem.strip_suffix("00") {
        Some(base) => format!("{base}{PROCESSED_SUFFIX}.fits"),
        None => format!("{stem}-{PROCESSED_SUFFIX}.fits"),
    }
}

pub fn output_path(root: &Path, frame: &Frame) -> PathBuf {
    output_directory(root, frame).join(output_filename(&frame.id.filename))
}

/// Configuration mode as it appears in file names; plain full-frame readout
/// is implicit.
pub fn config_fragment(configuration_mode: &str) -> String {
    configuration_mode
        .replace("full_frame", "")
        .replace("central_2k_2x2", "center")
}

/// `"2 2"` becomes `bin2x2`.
pub fn binning_fragment(binning: &str) -> String {
    let binning = binning.trim();
    if binning.is_empty() {
        return String::new();
    }
    format!("bin{}", binning.split_whitespace().collect::<Vec<_>>().join("x"))
}

fn key_fragment(attribute: GroupAttribute, value: &AttributeValue) -> String {
    match (attribute, value) {
        (GroupAttribute::ConfigurationMode, AttributeValue::Text(mode)) => config_fragment(mode),
        (GroupAttribute::Binning, AttributeValue::Text(binning)) => binning_fragment(binning),
        (_, AttributeValue::Millis(ms)) if ms % 1000 == 0 => format!("exp{}s", ms / 1000),
        (_, AttributeValue::Millis(ms)) => format!("exp{:.3}s", *ms as f64 / 1000.0),
        (GroupAttribute::Nx, AttributeValue::Size(n)) => format!("nx{n}"),
        (GroupAttribute::Ny, AttributeValue::Size(n)) => format!("ny{n}"),
        (_, other) => other.to_string().split_whitespace().collect::<Vec<_>>().join("_"),
    }
}

/// `<site>-<instrument>-<YYYYMMDD>-<caltype>[-<fragment>...].fits`
///
/// One fragment per attribute of the master's group key, in key order, so
/// masters of different groups never share a name. Empty fragments are
/// omitted.
pub fn master_filename(frame: &Frame, cal_type: CalibrationType, key: &GroupKey) -> String {
    let mut parts = vec![
        frame.id.site.clone(),
        frame.id.instrument.clone(),
        frame.id.epoch.format("%Y%m%d").to_string(),
        cal_type.slug().to_string(),
    ];
    parts.extend(key.0.iter().map(|(attr, value)| key_fragment(*attr, value)));
    parts.retain(|p| !p.is_empty());
    format!("{}.fits", parts.join("-"))
}

/// `<root>/<site>/<instrument>/<YYYYMMDD>/processed/<master name>`
pub fn master_path(root: &Path, frame: &Frame, cal_type: CalibrationType, key: &GroupKey) -> PathBuf {
    output_directory(root, frame).join(master_filename(frame, cal_type, key))
}
