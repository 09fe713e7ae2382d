mod checksum;
mod tracker;

pub use checksum::file_checksum;
pub use tracker::{Decision, ProcessingRecord, ProcessingTracker, SkipReason};
