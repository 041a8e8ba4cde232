//! `glancesync sync`: bring regions in line with the master region.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use glancesync_runner::RegionRun;
use glancesync_sync::{RegionSyncReport, SyncAction};

use super::Session;

/// Arguments for `glancesync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Regions or `<target>:` tokens (default: `master:`).
    pub regions: Vec<String>,

    /// Show what would change without touching any region.
    #[arg(long)]
    pub dry_run: bool,

    /// Sync up to `max_children` regions at once.
    #[arg(long, conflicts_with = "dry_run")]
    pub parallel: bool,

    /// Where parallel runs write their per-region logs (default: current directory).
    #[arg(long, value_name = "DIR", requires = "parallel")]
    pub log_dir: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, session: Session) -> Result<()> {
        let mut orchestrator = session.orchestrator(&self.regions)?;

        let runs = if self.parallel {
            let log_dir = match self.log_dir.clone() {
                Some(dir) => dir,
                None => std::env::current_dir().context("could not determine current directory")?,
            };
            orchestrator = orchestrator.with_log_dir(log_dir);
            orchestrator
                .parallel_sync_blocking()
                .context("parallel sync failed")?
        } else {
            orchestrator.sequential_sync(self.dry_run)
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&runs).context("failed to serialize sync JSON")?
            );
        } else {
            if runs.is_empty() {
                println!("No regions to sync.");
            }
            for run in &runs {
                print_results(run, self.dry_run);
            }
        }

        let failed: Vec<&str> = runs
            .iter()
            .filter(|run| !run.succeeded())
            .map(|run| run.region.as_str())
            .collect();
        if !failed.is_empty() {
            bail!("sync failed for {}", failed.join(", "));
        }
        Ok(())
    }
}

fn print_results(run: &RegionRun, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let region = &run.region;

    let Some(report) = &run.report else {
        let error = run.error.as_deref().unwrap_or("unknown error");
        println!("{prefix}✗ '{region}' failed: {error}");
        return;
    };

    if report.changes() == 0 && report.unresolved() == 0 && report.failures() == 0 {
        println!("{prefix}✓ '{region}' already in sync");
        return;
    }

    let mark = if report.failures() == 0 { "✓" } else { "✗" };
    println!(
        "{prefix}{mark} '{region}' synced ({} changed, {} unresolved, {} failed, {} ms)",
        report.changes(),
        report.unresolved(),
        report.failures(),
        run.duration_ms,
    );
    print_outcomes(report);
}

fn print_outcomes(report: &RegionSyncReport) {
    for outcome in &report.outcomes {
        let symbol = match outcome.action {
            SyncAction::Nothing => continue,
            SyncAction::Upload => "↑",
            SyncAction::UpdateMetadata => "✎",
            SyncAction::Replace => "⟳",
            SyncAction::Rename => "⇄",
            SyncAction::Deferred => "…",
            SyncAction::Reported => "!",
        };
        match &outcome.error {
            Some(error) => println!("  {symbol}  {} ({}): {error}", outcome.name, outcome.status),
            None => println!("  {symbol}  {} ({})", outcome.name, outcome.status),
        }
    }
    for retirement in &report.retirements {
        match &retirement.error {
            Some(error) => println!("  ⌫  {} [{}]: {error}", retirement.name, retirement.id),
            None => println!("  ⌫  {} [{}]", retirement.name, retirement.id),
        }
    }
    for warning in &report.warnings {
        println!("  ⚠  {warning}");
    }
}
