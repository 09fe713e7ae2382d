mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::GlobalArgs;

#[derive(Parser)]
#[command(name = "darkroom", about = "Calibration and reduction pipeline for CCD frames")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reduce a single raw frame
    Reduce(commands::reduce::ReduceArgs),
    /// Reduce every raw frame in a directory
    ReduceDir(commands::reduce_dir::ReduceDirArgs),
    /// Combine raw calibration frames into a master
    MakeMaster(commands::make_master::MakeMasterArgs),
    /// Show the processing record of a file
    Status(commands::status::StatusArgs),
    /// Manage known instruments
    Instrument(commands::instrument::InstrumentArgs),
    /// Print or save the default configuration
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(threads) = cli.global.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match &cli.command {
        Commands::Reduce(args) => commands::reduce::run(args, &cli.global),
        Commands::ReduceDir(args) => commands::reduce_dir::run(args, &cli.global),
        Commands::MakeMaster(args) => commands::make_master::run(args, &cli.global),
        Commands::Status(args) => commands::status::run(args, &cli.global),
        Commands::Instrument(args) => commands::instrument::run(args, &cli.global),
        Commands::Config(args) => commands::config::run(args),
    }
}
