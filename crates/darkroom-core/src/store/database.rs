use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::types::{CalibrationType, MasterCalibration};
use crate::error::Result;
use crate::tracking::ProcessingRecord;

use super::{CalibrationStore, Instrument, InstrumentStore, NewMaster, ProcessingStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    next_id: u64,
    instruments: Vec<Instrument>,
    calibrations: Vec<MasterCalibration>,
    processed: BTreeMap<String, ProcessingRecord>,
}

/// Store backed by a single JSON file, or held purely in memory.
///
/// Every mutation is written to a temporary file next to the database and
/// renamed over it, so readers never see a half-written file. Handles on the
/// same file, in this process or another, serialize their read-modify-write
/// cycles on an exclusive lock of `<db>.lock` and reload the tables from disk
/// inside it.
#[derive(Debug)]
pub struct Database {
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl Database {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Open the database at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = load(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Latest tables: reloaded from disk for a file-backed store.
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R> {
        let mut tables = self.tables.lock();
        if let Some(ref path) = self.path {
            *tables = load(path)?;
        }
        Ok(f(&tables))
    }

    /// Run `f` on the latest tables with every other writer shut out, and
    /// persist them if `f` reports a change.
    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> (R, bool)) -> Result<R> {
        let mut tables = self.tables.lock();
        let Some(ref path) = self.path else {
            return Ok(f(&mut tables).0);
        };
        let _lock = StoreLock::acquire(path)?;
        *tables = load(path)?;
        let (out, changed) = f(&mut tables);
        if changed {
            persist(path, &tables)?;
        }
        Ok(out)
    }
}

fn load(path: &Path) -> Result<Tables> {
    if !path.exists() {
        return Ok(Tables::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn persist(path: &Path, tables: &Tables) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(tables)?)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "Database persisted");
    Ok(())
}

/// Exclusive advisory lock on the file next to the database. Released when
/// dropped, or by the OS if the process dies.
struct StoreLock(File);

impl StoreLock {
    fn acquire(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(db_path.with_extension("lock"))?;
        file.lock()?;
        Ok(Self(file))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl InstrumentStore for Database {
    fn upsert_instrument(&self, instrument: Instrument) -> Result<()> {
        self.write(|tables| {
            match tables
                .instruments
                .iter_mut()
                .find(|i| i.same_key(&instrument))
            {
                Some(existing) => *existing = instrument,
                None => tables.instruments.push(instrument),
            }
            ((), true)
        })
    }

    fn instrument(&self, site: &str, camera: &str) -> Result<Option<Instrument>> {
        self.read(|tables| {
            let candidates: Vec<&Instrument> = tables
                .instruments
                .iter()
                .filter(|i| i.site == site && i.camera == camera)
                .collect();
            // Prefer a schedulable row when a camera appears on several telescopes.
            candidates
                .iter()
                .find(|i| i.schedulable)
                .or(candidates.first())
                .map(|i| (*i).clone())
        })
    }

    fn instruments(&self) -> Result<Vec<Instrument>> {
        self.read(|tables| tables.instruments.clone())
    }
}

impl CalibrationStore for Database {
    fn masters(&self, cal_type: CalibrationType, instrument: &str) -> Result<Vec<MasterCalibration>> {
        self.read(|tables| {
            tables
                .calibrations
                .iter()
                .filter(|m| m.cal_type == cal_type && m.instrument == instrument)
                .cloned()
                .collect()
        })
    }

    fn publish_master(&self, master: NewMaster) -> Result<MasterCalibration> {
        self.write(|tables| {
            let existing = tables.calibrations.iter().position(|m| {
                m.cal_type == master.cal_type
                    && m.instrument == master.instrument
                    && m.group_key == master.group_key
                    && m.dayobs == master.dayobs
            });
            let id = match existing {
                Some(i) => tables.calibrations[i].id,
                None => {
                    tables.next_id += 1;
                    tables.next_id
                }
            };
            let record = MasterCalibration {
                id,
                cal_type: master.cal_type,
                instrument: master.instrument,
                group_key: master.group_key,
                dayobs: master.dayobs,
                path: master.path,
                created: Utc::now(),
                mean_level: master.mean_level,
                readnoise: master.readnoise,
                frame_count: master.frame_count,
            };
            match existing {
                Some(i) => tables.calibrations[i] = record.clone(),
                None => tables.calibrations.push(record.clone()),
            }
            (record, true)
        })
    }
}

impl ProcessingStore for Database {
    fn record(&self, path: &Path) -> Result<Option<ProcessingRecord>> {
        self.read(|tables| tables.processed.get(&path_key(path)).cloned())
    }

    fn transact(
        &self,
        path: &Path,
        update: &mut dyn FnMut(&mut Option<ProcessingRecord>),
    ) -> Result<()> {
        let key = path_key(path);
        self.write(|tables| {
            let before = tables.processed.get(&key).cloned();
            let mut record = before.clone();
            update(&mut record);
            match record {
                Some(r) if Some(&r) != before.as_ref() => {
                    tables.processed.insert(key, r);
                    ((), true)
                }
                // Records are never deleted.
                _ => ((), false),
            }
        })
    }
}
