//! `glancesync regions`: show how tokens expand.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::Session;

/// Arguments for `glancesync regions`.
#[derive(Args, Debug)]
pub struct RegionsArgs {
    /// Regions or `<target>:` tokens (default: `master:`).
    pub regions: Vec<String>,
}

impl RegionsArgs {
    pub fn run(self, session: Session) -> Result<()> {
        let orchestrator = session.orchestrator(&self.regions)?;
        let grouped = orchestrator.show_regions();
        if grouped.is_empty() {
            println!("No regions.");
            return Ok(());
        }
        for (target, regions) in grouped {
            println!("{}", target.to_string().bold());
            for region in regions {
                println!("  {}", region.base());
            }
        }
        Ok(())
    }
}
