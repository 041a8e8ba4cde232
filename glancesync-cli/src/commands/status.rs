//! `glancesync status`: per-image synchronization status.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use glancesync_core::types::{RegionName, SyncStatus};
use glancesync_runner::RegionStatus;

use super::Session;

/// Arguments for `glancesync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Regions or `<target>:` tokens (default: `master:`).
    pub regions: Vec<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, session: Session) -> Result<()> {
        let master = session.config.master_region.clone();
        let orchestrator = session.orchestrator(&self.regions)?;
        let regions = orchestrator.report_status();

        if self.json {
            print_json(&master, regions)?;
            return Ok(());
        }

        print_table(&master, regions);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson {
    generated_at: DateTime<Utc>,
    summary: StatusSummaryJson,
    regions: Vec<RegionStatus>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    master_region: RegionName,
    regions: usize,
    pending: usize,
    errors: usize,
    unreachable: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "image")]
    image: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "local id")]
    local_id: String,
}

fn summarize(master: &RegionName, regions: &[RegionStatus]) -> StatusSummaryJson {
    let statuses = || regions.iter().flat_map(|r| r.images.iter().map(|row| row.status));
    StatusSummaryJson {
        master_region: master.clone(),
        regions: regions.len(),
        pending: statuses().filter(|s| s.is_pending()).count(),
        errors: statuses().filter(|s| s.is_error()).count(),
        unreachable: regions.iter().filter(|r| r.error.is_some()).count(),
    }
}

fn print_json(master: &RegionName, regions: Vec<RegionStatus>) -> Result<()> {
    let payload = StatusReportJson {
        generated_at: Utc::now(),
        summary: summarize(master, &regions),
        regions,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(master: &RegionName, regions: Vec<RegionStatus>) {
    let summary = summarize(master, &regions);
    println!(
        "GlanceSync v{} | master {} | {} regions | {} pending | {} errors",
        env!("CARGO_PKG_VERSION"),
        summary.master_region,
        summary.regions,
        summary.pending,
        summary.errors,
    );

    if regions.is_empty() {
        println!("No regions to report.");
        return;
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    println!(
        "Indicators: {} OK  {} PENDING  {} ERROR",
        status_indicator(SyncStatus::Ok),
        status_indicator(SyncStatus::PendingUpload),
        status_indicator(SyncStatus::ErrorChecksum),
    );
    println!("{separator}");

    for region in regions {
        println!("{}", region.region.to_string().to_uppercase().bold());
        if let Some(error) = &region.error {
            println!("{} {error}", "unreachable:".red().bold());
            println!("{separator}");
            continue;
        }

        let rows: Vec<StatusTableRow> = region
            .images
            .iter()
            .map(|row| StatusTableRow {
                image: row.name.clone(),
                status: format!("{} {}", status_indicator(row.status), row.status),
                local_id: row
                    .local_id
                    .as_ref()
                    .map_or_else(|| "-".to_string(), ToString::to_string),
            })
            .collect();
        if rows.is_empty() {
            println!("No eligible images.");
        } else {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        if region.pending_retirements > 0 {
            println!("{} local copies to retire", region.pending_retirements);
        }
        for warning in &region.warnings {
            println!("{} {warning}", "warning:".yellow());
        }
        println!("{separator}");
    }

    if summary.pending > 0 {
        println!("Run 'glancesync sync' to converge pending images.");
    }
}

fn status_indicator(status: SyncStatus) -> String {
    if status.is_converged() {
        "■".green().bold().to_string()
    } else if status.is_error() {
        "■".red().bold().to_string()
    } else {
        "■".yellow().bold().to_string()
    }
}
