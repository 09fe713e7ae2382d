pub mod config;
pub mod instrument;
pub mod make_master;
pub mod reduce;
pub mod reduce_dir;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use darkroom_core::astrometry::HttpPlateSolver;
use darkroom_core::frame::parse_dayobs;
use darkroom_core::pipeline::{Orchestrator, ReductionConfig};
use darkroom_core::store::Database;
use tracing::debug;

/// Options shared by every subcommand.
#[derive(Args)]
pub struct GlobalArgs {
    /// Reduction config file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file
    #[arg(long, global = true, default_value = "darkroom.json")]
    pub db: PathBuf,

    /// Worker threads (default: one per core)
    #[arg(long, global = true)]
    pub threads: Option<usize>,
}

/// Options that override the `[processing]` config section.
#[derive(Args)]
pub struct ProcessingArgs {
    /// Root of the processed-data tree
    #[arg(long)]
    pub processed: Option<PathBuf>,

    /// Reduce frames from instruments that are not schedulable
    #[arg(long)]
    pub ignore_schedulability: bool,

    /// Attempts per file before it is no longer scheduled
    #[arg(long)]
    pub max_tries: Option<u32>,
}

impl ProcessingArgs {
    fn apply(&self, config: &mut ReductionConfig) {
        if let Some(ref processed) = self.processed {
            config.processing.processed_path = processed.clone();
        }
        if self.ignore_schedulability {
            config.processing.ignore_schedulability = true;
        }
        if let Some(max_tries) = self.max_tries {
            config.processing.max_tries = max_tries;
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<ReductionConfig> {
    match path {
        Some(path) => ReductionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ReductionConfig::default()),
    }
}

pub fn open_db(path: &Path) -> Result<Arc<Database>> {
    let db = Database::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    debug!(db = %path.display(), "Opened database");
    Ok(Arc::new(db))
}

/// Config, database and plate solver wired into an orchestrator.
pub fn build_orchestrator(
    global: &GlobalArgs,
    processing: &ProcessingArgs,
    tweak: impl FnOnce(&mut ReductionConfig),
) -> Result<Orchestrator> {
    let mut config = load_config(global.config.as_deref())?;
    processing.apply(&mut config);
    tweak(&mut config);
    config.validate().context("Invalid configuration")?;

    let db = open_db(&global.db)?;
    let mut orchestrator = Orchestrator::new(config.clone(), db);
    if !config.astrometry.url.is_empty() {
        let solver = HttpPlateSolver::new(config.astrometry.url.clone(), config.astrometry.timeout())
            .context("Failed to create astrometry client")?;
        debug!(url = %solver.url(), "Using astrometry service");
        orchestrator = orchestrator.with_solver(Arc::new(solver));
    }
    Ok(orchestrator)
}

/// Accepts `YYYY-MM-DD` and `YYYYMMDD`.
pub fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    parse_dayobs(value).map_err(|_| format!("invalid date '{value}'"))
}
