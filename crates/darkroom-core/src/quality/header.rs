use crate::frame::{Frame, ObsType};

/// Keywords every raw frame header must carry.
pub const REQUIRED_KEYWORDS: &[&str] = &["OBSTYPE", "SITEID", "INSTRUME", "DAY-OBS"];

/// List what is wrong with the frame's header, empty when it is sane.
///
/// Frames built in memory carry their identity in typed fields, so only
/// frames with a non-empty header are checked for keywords.
pub fn header_problems(frame: &Frame) -> Vec<String> {
    let mut problems = Vec::new();

    if !frame.header.is_empty() {
        for key in REQUIRED_KEYWORDS {
            if !frame.header.contains(key) {
                problems.push(format!("missing {key}"));
            }
        }
    }

    let exptime = frame.attributes.exposure_time;
    if frame.obstype != ObsType::Bias && !(exptime > 0.0) {
        problems.push(format!("exposure time {exptime} is not positive"));
    }
    if !frame.readnoise.is_finite() || frame.readnoise < 0.0 {
        problems.push(format!("read noise {} is invalid", frame.readnoise));
    }
    if !(frame.saturation > 0.0) {
        problems.push(format!("saturation level {} is not positive", frame.saturation));
    }
    problems
}
