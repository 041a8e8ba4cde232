//! `glancesync backup`: snapshot the master region's metadata.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::Session;

/// Arguments for `glancesync backup`.
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Directory that receives `backup_glance_<timestamp>` (default: current directory).
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

impl BackupArgs {
    pub fn run(self, session: Session) -> Result<()> {
        let base = match self.dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("could not determine current directory")?,
        };
        let master = session.config.master_region.clone();
        let orchestrator = session.orchestrator(&[master.as_str()])?;
        let dir = orchestrator
            .make_backup(&base)
            .with_context(|| format!("backup of '{master}' failed"))?;
        println!("✓ '{master}' backed up to {}", dir.display());
        Ok(())
    }
}
