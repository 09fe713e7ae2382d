use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::astrometry::{NullPlateSolver, PlateSolver};
use crate::calibration::combine::combine;
use crate::calibration::types::{CalibrationType, CombinedMaster, MasterCalibration};
use crate::calibration::{FitsMasterLoader, MasterLoader};
use crate::error::{ReductionError, Result};
use crate::frame::{parse_dayobs, Frame, ObsType};
use crate::group::{group_frames, single_group};
use crate::io::naming::{master_path, output_path};
use crate::io::{read_frame, read_header, write_frame};
use crate::notify::{NullPublisher, Publisher};
use crate::store::{CalibrationStore, Database, InstrumentStore, NewMaster};
use crate::tracking::{file_checksum, ProcessingTracker};

use super::config::ReductionConfig;
use super::runner::PipelineRunner;
use super::stage::StageContext;
use super::types::{
    CancelToken, FileOutcome, PipelineStage, ProgressReporter, RunReport, RunState,
};

/// Per-file outcomes of a directory run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<(PathBuf, FileOutcome)>,
}

impl BatchSummary {
    pub fn reduced(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Reduced { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Result of gating one file in a directory run.
enum Gate {
    Admit(String),
    Skip,
    Error(String),
}

/// Which raw frames feed a master calibration.
#[derive(Clone, Debug)]
pub struct MasterCriteria {
    pub cal_type: CalibrationType,
    pub site: String,
    pub camera: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Ties the reduction core to its stores, services and output tree.
pub struct Orchestrator {
    config: ReductionConfig,
    instruments: Arc<dyn InstrumentStore>,
    calibrations: Arc<dyn CalibrationStore>,
    tracker: ProcessingTracker,
    masters: Arc<dyn MasterLoader>,
    solver: Arc<dyn PlateSolver>,
    publisher: Arc<dyn Publisher>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(config: ReductionConfig, db: Arc<Database>) -> Self {
        Self {
            config,
            instruments: db.clone(),
            calibrations: db.clone(),
            tracker: ProcessingTracker::new(db),
            masters: Arc::new(FitsMasterLoader::new()),
            solver: Arc::new(NullPlateSolver),
            publisher: Arc::new(NullPublisher),
            cancel: CancelToken::default(),
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn PlateSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_master_loader(mut self, masters: Arc<dyn MasterLoader>) -> Self {
        self.masters = masters;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ProcessingTracker {
        &self.tracker
    }

    pub fn context(&self) -> StageContext<'_> {
        StageContext {
            config: &self.config,
            calibrations: self.calibrations.as_ref(),
            masters: self.masters.as_ref(),
            solver: self.solver.as_ref(),
        }
    }

    /// Whether `path` should be reduced now.
    ///
    /// The file must look like FITS, carry a known `OBSTYPE`, belong to a
    /// schedulable instrument (unless schedulability is ignored) and pass the
    /// tracker's checksum and retry gate.
    pub fn need_to_process(&self, path: &Path) -> Result<bool> {
        Ok(self.admit(path)?.is_some())
    }

    /// Gate `path`; returns the checksum it was admitted with.
    fn admit(&self, path: &Path) -> Result<Option<String>> {
        if !is_fits_name(path) {
            debug!(path = %path.display(), "Not a FITS file");
            return Ok(None);
        }

        let header = read_header(path)?;
        match header.require_str("OBSTYPE")?.parse::<ObsType>() {
            Ok(_) => {}
            Err(e @ ReductionError::UnknownObsType(_)) => {
                warn!(path = %path.display(), error = %e, "Not reducing frame");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let site = header.require_str("SITEID")?.trim();
        let camera = header.require_str("INSTRUME")?.trim();
        let ignore = self.config.processing.ignore_schedulability;
        match self.instruments.instrument(site, camera)? {
            Some(instrument) if instrument.schedulable || ignore => {}
            Some(_) => {
                info!(site, camera, "Instrument is not schedulable, skipping");
                return Ok(None);
            }
            None if ignore => {}
            None => {
                warn!(site, camera, "Instrument not in database, skipping");
                return Ok(None);
            }
        }

        let checksum = file_checksum(path)?;
        let decision = self
            .tracker
            .decide(path, &checksum, self.config.processing.max_tries)?;
        Ok(decision.needs_processing().then_some(checksum))
    }

    /// Gate, reduce and write one raw frame, updating the tracker.
    pub fn reduce_file(&self, path: &Path) -> Result<FileOutcome> {
        let Some(checksum) = self.admit(path)? else {
            return Ok(FileOutcome::Skipped);
        };
        self.reduce_admitted(path, &checksum)
    }

    /// Reduce a file the gate has let through with `checksum`.
    fn reduce_admitted(&self, path: &Path, checksum: &str) -> Result<FileOutcome> {
        let outcome = match self.process_file(path, checksum) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Reduction failed");
                FileOutcome::Failed(e.to_string())
            }
        };

        match &outcome {
            FileOutcome::Reduced { output, .. } => {
                self.tracker.mark_success(path)?;
                if let Err(e) = self.publisher.publish(output) {
                    warn!(output = %output.display(), error = %e, "Could not publish output");
                }
            }
            FileOutcome::Failed(_) => self.tracker.increment_tries(path)?,
            FileOutcome::Skipped => {}
        }
        Ok(outcome)
    }

    fn process_file(&self, path: &Path, checksum: &str) -> Result<FileOutcome> {
        let frame = read_frame(path)?;
        if file_checksum(path)? != checksum {
            return Err(ReductionError::ChecksumChanged(path.to_path_buf()));
        }

        let report = self.run_frame(frame);
        if let RunState::Skipped(reason) = &report.state {
            if self.cancel.is_cancelled() {
                info!(path = %path.display(), reason = %reason, "Run cancelled, nothing written");
                return Ok(FileOutcome::Skipped);
            }
        }
        if report.needs_retry() {
            let message = report
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.stage, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Ok(FileOutcome::Failed(message));
        }

        let output = output_path(&self.config.processing.processed_path, &report.frame);
        write_frame(&report.frame, &output)?;
        info!(
            output = %output.display(),
            is_bad = report.frame.is_bad,
            "Wrote reduced frame"
        );
        Ok(FileOutcome::Reduced {
            output,
            is_bad: report.frame.is_bad,
        })
    }

    /// Run one in-memory frame through its configured stage list.
    pub fn run_frame(&self, frame: Frame) -> RunReport {
        let steps = self.config.stages.for_obstype(frame.obstype);
        PipelineRunner::new(steps)
            .with_cancel(self.cancel.clone())
            .run(frame, &self.context())
    }

    /// Reduce every FITS file in `dir` in parallel.
    ///
    /// All files are gated first, then the admitted ones are reduced.
    pub fn reduce_directory(
        &self,
        dir: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchSummary> {
        let files = list_fits_files(dir)?;
        info!(dir = %dir.display(), files = files.len(), "Reducing directory");

        reporter.begin_stage(PipelineStage::Gating, Some(files.len()));
        let done = AtomicUsize::new(0);
        let gated: Vec<(PathBuf, Gate)> = files
            .into_par_iter()
            .map(|path| {
                let gate = if self.cancel.is_cancelled() {
                    Gate::Skip
                } else {
                    match self.admit(&path) {
                        Ok(Some(checksum)) => Gate::Admit(checksum),
                        Ok(None) => Gate::Skip,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Could not check file");
                            Gate::Error(e.to_string())
                        }
                    }
                };
                reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
                (path, gate)
            })
            .collect();
        reporter.finish_stage();

        let admitted = gated
            .iter()
            .filter(|(_, gate)| matches!(gate, Gate::Admit(_)))
            .count();
        info!(admitted, total = gated.len(), "Files admitted for reduction");

        reporter.begin_stage(PipelineStage::Reducing, Some(admitted));
        let done = AtomicUsize::new(0);
        let outcomes: Vec<(PathBuf, FileOutcome)> = gated
            .into_par_iter()
            .map(|(path, gate)| {
                let checksum = match gate {
                    Gate::Admit(checksum) => checksum,
                    Gate::Skip => return (path, FileOutcome::Skipped),
                    Gate::Error(message) => return (path, FileOutcome::Failed(message)),
                };
                let outcome = if self.cancel.is_cancelled() {
                    FileOutcome::Skipped
                } else {
                    self.reduce_admitted(&path, &checksum).unwrap_or_else(|e| {
                        warn!(path = %path.display(), error = %e, "Could not process file");
                        FileOutcome::Failed(e.to_string())
                    })
                };
                reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
                (path, outcome)
            })
            .collect();
        reporter.finish_stage();

        Ok(BatchSummary { outcomes })
    }

    /// Raw frames in `dir` matching `criteria`, sorted by path.
    pub fn collect_calibration_frames(
        &self,
        dir: &Path,
        criteria: &MasterCriteria,
    ) -> Result<Vec<PathBuf>> {
        let obstype = criteria.cal_type.obstype();
        let mut selected = Vec::new();
        for path in list_fits_files(dir)? {
            let header = match read_header(&path) {
                Ok(header) => header,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            let matches = header
                .get_str("OBSTYPE")
                .and_then(|s| s.parse::<ObsType>().ok())
                == Some(obstype)
                && header.get_str("SITEID").map(str::trim) == Some(criteria.site.as_str())
                && header.get_str("INSTRUME").map(str::trim) == Some(criteria.camera.as_str())
                && header
                    .get_str("DAY-OBS")
                    .and_then(|d| parse_dayobs(d).ok())
                    .is_some_and(|d| d >= criteria.start && d <= criteria.end);
            if matches {
                selected.push(path);
            }
        }
        Ok(selected)
    }

    /// Build and publish master calibrations from raw frames.
    ///
    /// Each frame runs through its stage list; bad frames are dropped. The
    /// rest are grouped by the configured attributes, and every group that is
    /// homogeneous in shape and holds enough frames becomes one master.
    pub fn make_masters(
        &self,
        paths: &[PathBuf],
        cal_type: CalibrationType,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<MasterCalibration>> {
        let obstype = cal_type.obstype();

        reporter.begin_stage(PipelineStage::Reducing, Some(paths.len()));
        let done = AtomicUsize::new(0);
        let frames: Vec<Frame> = paths
            .par_iter()
            .filter_map(|path| {
                let kept = self.reduce_for_master(path, obstype);
                reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
                kept
            })
            .collect();
        reporter.finish_stage();

        if self.cancel.is_cancelled() {
            info!("Master creation cancelled");
            return Ok(Vec::new());
        }
        info!(
            cal_type = %cal_type,
            usable = frames.len(),
            total = paths.len(),
            "Frames reduced for master creation"
        );

        reporter.begin_stage(PipelineStage::Grouping, None);
        let group_by = self.config.calibration.group_by(cal_type);
        let groups = group_frames(frames, group_by, &[]);
        reporter.finish_stage();

        reporter.begin_stage(PipelineStage::Combining, Some(groups.len()));
        let mut combined = Vec::new();
        for (i, group) in groups.into_iter().enumerate() {
            let key = group.key().clone();
            match single_group(group.into_frames(), group_by) {
                Some(group) => {
                    combined.extend(combine(&group, cal_type, self.config.calibration.min_images))
                }
                None => {
                    let err =
                        ReductionError::InhomogeneousGroup(format!("frame shape in group {key}"));
                    warn!(error = %err, "No master made");
                }
            }
            reporter.advance(i + 1);
        }
        reporter.finish_stage();

        reporter.begin_stage(PipelineStage::Writing, Some(combined.len()));
        let mut published = Vec::new();
        for (i, master) in combined.into_iter().enumerate() {
            published.push(self.write_master(master)?);
            reporter.advance(i + 1);
        }
        reporter.finish_stage();
        Ok(published)
    }

    /// Write a combined master to the processed tree, then record and
    /// announce it. The record only appears once the file is complete.
    fn write_master(&self, master: CombinedMaster) -> Result<MasterCalibration> {
        let path = master_path(
            &self.config.processing.processed_path,
            &master.frame,
            master.cal_type,
            &master.group_key,
        );
        write_frame(&master.frame, &path)?;
        let record = self.calibrations.publish_master(NewMaster {
            cal_type: master.cal_type,
            instrument: master.frame.id.instrument.clone(),
            group_key: master.group_key,
            dayobs: master.frame.id.epoch,
            path: path.clone(),
            mean_level: master.mean_level,
            readnoise: master.readnoise,
            frame_count: master.frame_count,
        })?;
        info!(
            master = %path.display(),
            group = %record.group_key,
            frames = record.frame_count,
            "Published master calibration"
        );
        if let Err(e) = self.publisher.publish(&path) {
            warn!(master = %path.display(), error = %e, "Could not publish master");
        }
        Ok(record)
    }

    fn reduce_for_master(&self, path: &Path, obstype: ObsType) -> Option<Frame> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let frame = match read_frame(path) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read frame");
                return None;
            }
        };
        if frame.obstype != obstype {
            warn!(path = %path.display(), obstype = %frame.obstype, "Wrong frame type for master");
            return None;
        }
        let report = self.run_frame(frame);
        if report.frame.is_bad || matches!(report.state, RunState::Failed(_)) {
            info!(path = %path.display(), "Frame rejected from master");
            return None;
        }
        Some(report.frame)
    }
}

pub fn is_fits_name(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".fits") || name.ends_with(".fits.fz")
}

fn list_fits_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_fits_name(p))
        .collect();
    files.sort();
    Ok(files)
}
