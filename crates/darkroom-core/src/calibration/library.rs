use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::frame::Frame;
use crate::io::read_frame;

use super::types::MasterCalibration;

/// Loads the pixel planes of a stored master.
pub trait MasterLoader: Send + Sync {
    fn load(&self, master: &MasterCalibration) -> Result<Arc<Frame>>;
}

/// Reads masters from disk, keeping every loaded master in memory.
///
/// Masters are immutable once published, so a cached frame never goes stale.
#[derive(Default)]
pub struct FitsMasterLoader {
    cache: Mutex<HashMap<PathBuf, Arc<Frame>>>,
}

impl FitsMasterLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    fn read(&self, path: &Path) -> Result<Arc<Frame>> {
        if let Some(frame) = self.cache.lock().get(path) {
            return Ok(Arc::clone(frame));
        }
        // Read outside the lock; concurrent misses on one path both read
        // and the first insert wins.
        let frame = Arc::new(read_frame(path)?);
        debug!(path = %path.display(), "Loaded master calibration");
        let mut cache = self.cache.lock();
        Ok(Arc::clone(
            cache.entry(path.to_path_buf()).or_insert(frame),
        ))
    }
}

impl MasterLoader for FitsMasterLoader {
    fn load(&self, master: &MasterCalibration) -> Result<Arc<Frame>> {
        self.read(&master.path)
    }
}

/// Serves masters registered in memory by path; for tests and dry runs.
#[derive(Default)]
pub struct MemoryMasterLoader {
    frames: Mutex<HashMap<PathBuf, Arc<Frame>>>,
}

impl MemoryMasterLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, frame: Frame) {
        self.frames.lock().insert(path.into(), Arc::new(frame));
    }
}

impl MasterLoader for MemoryMasterLoader {
    fn load(&self, master: &MasterCalibration) -> Result<Arc<Frame>> {
        self.frames.lock().get(&master.path).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no master loaded for {}", master.path.display()),
            )
            .into()
        })
    }
}
