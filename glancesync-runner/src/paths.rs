use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use glancesync_core::types::RegionName;

pub const BACKUP_DIR_PREFIX: &str = "backup_glance_";
pub const SYNC_LOG_DIR_PREFIX: &str = "sync_";

/// `<base>/backup_glance_<iso timestamp>`.
pub fn backup_dir(base: &Path, at: DateTime<Utc>) -> PathBuf {
    base.join(format!(
        "{BACKUP_DIR_PREFIX}{}",
        at.format("%Y-%m-%dT%H:%M:%S%.3f")
    ))
}

/// `<base>/sync_<YYYYMMDD_HHMM>`, one per parallel run.
pub fn sync_log_dir(base: &Path, at: DateTime<Utc>) -> PathBuf {
    base.join(format!("{SYNC_LOG_DIR_PREFIX}{}", at.format("%Y%m%d_%H%M")))
}

/// Log file of one region inside a run's log directory.
pub fn region_log_path(run_dir: &Path, region: &RegionName) -> PathBuf {
    run_dir.join(format!("{region}.txt"))
}

/// Machine-readable summary of every region job of a run.
pub fn run_summary_path(run_dir: &Path) -> PathBuf {
    run_dir.join("summary.json")
}
