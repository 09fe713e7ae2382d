use anyhow::Result;
use clap::{Args, Subcommand};
use darkroom_core::store::{Instrument, InstrumentStore};

use super::{open_db, GlobalArgs};

#[derive(Args)]
pub struct InstrumentArgs {
    #[command(subcommand)]
    pub command: InstrumentCommand,
}

#[derive(Subcommand)]
pub enum InstrumentCommand {
    /// Add an instrument, or update the one with the same site, camera, enclosure and telescope
    Add(AddArgs),
    /// List known instruments
    List,
}

#[derive(Args)]
pub struct AddArgs {
    #[arg(long)]
    pub site: String,

    #[arg(long)]
    pub camera: String,

    #[arg(long)]
    pub enclosure: String,

    #[arg(long)]
    pub telescope: String,

    #[arg(long, default_value = "")]
    pub camera_type: String,

    /// Mark the instrument as not schedulable
    #[arg(long)]
    pub unschedulable: bool,
}

pub fn run(args: &InstrumentArgs, global: &GlobalArgs) -> Result<()> {
    let db = open_db(&global.db)?;
    match &args.command {
        InstrumentCommand::Add(add) => {
            db.upsert_instrument(Instrument {
                site: add.site.clone(),
                camera: add.camera.clone(),
                enclosure: add.enclosure.clone(),
                telescope: add.telescope.clone(),
                camera_type: add.camera_type.clone(),
                schedulable: !add.unschedulable,
            })?;
            println!("Saved {} {} in {}", add.site, add.camera, global.db.display());
        }
        InstrumentCommand::List => {
            for i in db.instruments()? {
                println!(
                    "{:<6}{:<8}{:<8}{:<8}{:<12}{}",
                    i.site,
                    i.camera,
                    i.enclosure,
                    i.telescope,
                    i.camera_type,
                    if i.schedulable { "schedulable" } else { "-" }
                );
            }
        }
    }
    Ok(())
}
