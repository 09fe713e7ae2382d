use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use darkroom_core::io::{read_header, stage_statuses};
use darkroom_core::store::ProcessingStore;

use super::{open_db, GlobalArgs};

#[derive(Args)]
pub struct StatusArgs {
    /// Raw or reduced FITS frame
    pub file: PathBuf,
}

pub fn run(args: &StatusArgs, global: &GlobalArgs) -> Result<()> {
    let db = open_db(&global.db)?;

    println!("File:        {}", args.file.display());
    if let Ok(header) = read_header(&args.file) {
        for key in ["OBSTYPE", "SITEID", "INSTRUME", "DAY-OBS", "FILTER"] {
            if let Some(value) = header.get_str(key) {
                println!("{:<13}{}", format!("{key}:"), value.trim());
            }
        }
        // Reduced frames carry the outcome of every stage.
        let stages = stage_statuses(&header);
        if !stages.is_empty() {
            println!("Stages:");
            for (stage, status) in &stages {
                println!("  {}", status.encode(stage));
            }
        }
    }

    match db.record(&args.file)? {
        Some(record) => {
            println!("Checksum:    {}", record.checksum);
            println!("Tries:       {}", record.tries);
            println!("Success:     {}", record.success);
            println!("Created:     {}", record.created);
            println!("Updated:     {}", record.updated);
        }
        None => println!("Never processed"),
    }
    Ok(())
}
