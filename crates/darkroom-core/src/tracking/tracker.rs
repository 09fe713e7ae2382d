use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::store::ProcessingStore;

/// Processing history of one input path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub path: PathBuf,
    pub checksum: String,
    pub tries: u32,
    pub success: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl ProcessingRecord {
    fn new(path: &Path, checksum: &str) -> Self {
        let now = Utc::now();
        Self {
            path: path.to_path_buf(),
            checksum: checksum.to_string(),
            tries: 0,
            success: false,
            created: now,
            updated: now,
        }
    }
}

/// Why the tracker declined a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    RetriesExhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    NeedsProcessing,
    Skip(SkipReason),
}

impl Decision {
    pub fn needs_processing(&self) -> bool {
        matches!(self, Self::NeedsProcessing)
    }
}

/// Checksum-gated, retry-bounded record of which files need reduction.
#[derive(Clone)]
pub struct ProcessingTracker {
    store: Arc<dyn ProcessingStore>,
}

impl ProcessingTracker {
    pub fn new(store: Arc<dyn ProcessingStore>) -> Self {
        Self { store }
    }

    /// Decide whether `path` needs (re)processing.
    ///
    /// A new path or a changed checksum resets the record and always needs
    /// processing. Otherwise the file is processed only while it has not
    /// succeeded and `tries < max_tries`.
    pub fn decide(&self, path: &Path, checksum: &str, max_tries: u32) -> Result<Decision> {
        let mut decision = Decision::NeedsProcessing;
        self.store.transact(path, &mut |slot| {
            decision = match slot {
                None => {
                    *slot = Some(ProcessingRecord::new(path, checksum));
                    Decision::NeedsProcessing
                }
                Some(record) if record.checksum != checksum => {
                    info!(path = %path.display(), "File changed on disk, resetting tries");
                    record.checksum = checksum.to_string();
                    record.tries = 0;
                    record.success = false;
                    record.updated = Utc::now();
                    Decision::NeedsProcessing
                }
                Some(record) if record.success => Decision::Skip(SkipReason::AlreadyProcessed),
                Some(record) if record.tries < max_tries => Decision::NeedsProcessing,
                Some(_) => Decision::Skip(SkipReason::RetriesExhausted),
            };
        })?;
        debug!(path = %path.display(), ?decision, "Processing decision");
        Ok(decision)
    }

    pub fn mark_success(&self, path: &Path) -> Result<()> {
        self.store.transact(path, &mut |slot| {
            if let Some(record) = slot {
                record.success = true;
                record.updated = Utc::now();
            }
        })
    }

    pub fn increment_tries(&self, path: &Path) -> Result<()> {
        self.store.transact(path, &mut |slot| {
            if let Some(record) = slot {
                record.tries += 1;
                record.updated = Utc::now();
            }
        })
    }

    pub fn record(&self, path: &Path) -> Result<Option<ProcessingRecord>> {
        self.store.record(path)
    }
}
