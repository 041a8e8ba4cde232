//! GlanceSync: keep regional image catalogs in line with a master region.
//!
//! # Usage
//!
//! ```text
//! glancesync [--config <path>] [--store <dir>] sync [REGIONS...] [--dry-run | --parallel]
//! glancesync [--config <path>] [--store <dir>] status [REGIONS...] [--json]
//! glancesync [--config <path>] [--store <dir>] backup [--dir <dir>]
//! glancesync [--config <path>] [--store <dir>] regions [REGIONS...]
//! ```
//!
//! `REGIONS` are region names or `<target>:` tokens; none means `master:`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    backup::BackupArgs, regions::RegionsArgs, status::StatusArgs, sync::SyncArgs, Session,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "glancesync",
    version,
    about = "Synchronize VM images from a master region to regional stores",
    long_about = None,
)]
struct Cli {
    /// Configuration file [default: ~/.glancesync/config.yaml].
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory of the persisted image store [default: ~/.glancesync/store].
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring regions in line with the master region.
    Sync(SyncArgs),

    /// Show the synchronization status of every eligible image.
    Status(StatusArgs),

    /// Export the master region's metadata into a timestamped directory.
    Backup(BackupArgs),

    /// List the regions a token list expands to.
    Regions(RegionsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    glancesync_runner::init_tracing();

    let session = Session::open(cli.config.as_deref(), cli.store.as_deref())?;
    match cli.command {
        Commands::Sync(args) => args.run(session),
        Commands::Status(args) => args.run(session),
        Commands::Backup(args) => args.run(session),
        Commands::Regions(args) => args.run(session),
    }
}
