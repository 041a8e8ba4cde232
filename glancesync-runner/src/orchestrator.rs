use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use glancesync_core::{
    config::SyncConfig,
    types::{ImageId, RegionName, SyncStatus, TargetName},
};
use glancesync_sync::{region_status, sync_region, ImageStore, RegionSyncReport};

use crate::error::{io_err, RunnerError};
use crate::paths::{backup_dir, region_log_path, run_summary_path, sync_log_dir};
use crate::plan::plan_regions;

/// Outcome of one region job.
#[derive(Debug, Clone, Serialize)]
pub struct RegionRun {
    pub region: RegionName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RegionSyncReport>,
    /// Region-level failure: unreachable region, unknown target, panicked job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u128,
}

impl RegionRun {
    fn failed(region: RegionName, error: String, duration_ms: u128) -> Self {
        Self {
            region,
            report: None,
            error: Some(error),
            duration_ms,
        }
    }

    /// No region-level error and no failed store call.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.report.as_ref().map_or(true, |r| r.failures() == 0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub name: String,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<ImageId>,
}

/// Read-only view of one region.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStatus {
    pub region: RegionName,
    pub images: Vec<StatusRow>,
    pub pending_retirements: usize,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs region jobs over a fixed, ordered region list.
pub struct Orchestrator {
    store: Arc<dyn ImageStore>,
    config: Arc<SyncConfig>,
    regions: Vec<RegionName>,
    log_dir: Option<PathBuf>,
}

impl Orchestrator {
    /// Plan the regions named by `tokens` (see [`crate::plan`]).
    pub fn new<S: AsRef<str>>(
        store: Arc<dyn ImageStore>,
        config: SyncConfig,
        tokens: &[S],
    ) -> Result<Self, RunnerError> {
        let preferred = config.master_policy()?.preferred_region_order.clone();
        let regions = plan_regions(tokens, store.as_ref(), &config.master_region, &preferred)?;
        tracing::debug!(regions = ?regions, "planned regions");
        Ok(Self {
            store,
            config: Arc::new(config),
            regions,
            log_dir: None,
        })
    }

    /// Write one log file per region under `<dir>/sync_<YYYYMMDD_HHMM>/` in
    /// parallel runs.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn regions(&self) -> &[RegionName] {
        &self.regions
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sync every planned region, one after the other.
    pub fn sequential_sync(&self, dry_run: bool) -> Vec<RegionRun> {
        self.regions
            .iter()
            .map(|region| run_region(self.store.as_ref(), &self.config, region, dry_run))
            .collect()
    }

    /// Sync every planned region in batches of at most `max_children` jobs.
    ///
    /// Each batch is awaited in full before the next one starts. A panicking
    /// job only fails its own region.
    pub async fn parallel_sync(&self) -> Vec<RegionRun> {
        let batch_size = self.config.max_children.max(1);
        let log_dir = self.prepare_log_dir();
        let mut runs = Vec::with_capacity(self.regions.len());

        for batch in self.regions.chunks(batch_size) {
            let handles: Vec<_> = batch
                .iter()
                .map(|region| {
                    let store = Arc::clone(&self.store);
                    let config = Arc::clone(&self.config);
                    let job_region = region.clone();
                    let handle = tokio::task::spawn_blocking(move || {
                        run_region(store.as_ref(), &config, &job_region, false)
                    });
                    (region.clone(), handle)
                })
                .collect();

            for (region, handle) in handles {
                let run = match handle.await {
                    Ok(run) => run,
                    Err(err) => {
                        let err = RunnerError::Join {
                            region: region.clone(),
                            message: err.to_string(),
                        };
                        tracing::error!(error = %err, "region job aborted");
                        RegionRun::failed(region, err.to_string(), 0)
                    }
                };
                if let Some(dir) = &log_dir {
                    if let Err(err) = write_region_log(dir, &run) {
                        tracing::warn!(error = %err, "could not write region log");
                    }
                }
                runs.push(run);
            }
        }

        if let Some(dir) = &log_dir {
            if let Err(err) = write_run_summary(dir, &runs) {
                tracing::warn!(error = %err, "could not write run summary");
            }
        }
        runs
    }

    /// [`Self::parallel_sync`] on a dedicated multi-thread runtime.
    pub fn parallel_sync_blocking(&self) -> Result<Vec<RegionRun>, RunnerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| io_err("tokio-runtime", e))?;
        Ok(runtime.block_on(self.parallel_sync()))
    }

    /// Export the master region's metadata into a new
    /// `backup_glance_<timestamp>` directory under `base`.
    pub fn make_backup(&self, base: &Path) -> Result<PathBuf, RunnerError> {
        fs::create_dir_all(base).map_err(|e| io_err(base, e))?;
        let dir = backup_dir(base, Utc::now());
        fs::create_dir(&dir).map_err(|e| io_err(&dir, e))?;
        self.store
            .export_metadata(&self.config.master_region, &dir)?;
        tracing::info!(
            region = %self.config.master_region,
            dir = %dir.display(),
            "backup written"
        );
        Ok(dir)
    }

    /// Reconcile every planned region without changing anything.
    pub fn report_status(&self) -> Vec<RegionStatus> {
        self.regions
            .iter()
            .map(|region| match region_status(self.store.as_ref(), &self.config, region) {
                Ok(result) => RegionStatus {
                    region: region.clone(),
                    images: result
                        .entries
                        .iter()
                        .map(|entry| StatusRow {
                            name: entry.name().to_string(),
                            status: entry.status,
                            local_id: entry.local.as_ref().map(|l| l.id.clone()),
                        })
                        .collect(),
                    pending_retirements: result.retirements.len(),
                    warnings: result.warnings.iter().map(ToString::to_string).collect(),
                    error: None,
                },
                Err(err) => {
                    tracing::error!(region = %region, error = %err, "status failed");
                    RegionStatus {
                        region: region.clone(),
                        images: vec![],
                        pending_retirements: 0,
                        warnings: vec![],
                        error: Some(err.to_string()),
                    }
                }
            })
            .collect()
    }

    /// Planned regions grouped by target, in plan order.
    pub fn show_regions(&self) -> BTreeMap<TargetName, Vec<RegionName>> {
        let mut grouped: BTreeMap<TargetName, Vec<RegionName>> = BTreeMap::new();
        for region in &self.regions {
            grouped
                .entry(region.target())
                .or_default()
                .push(region.clone());
        }
        grouped
    }

    fn prepare_log_dir(&self) -> Option<PathBuf> {
        let base = self.log_dir.as_ref()?;
        let dir = sync_log_dir(base, Utc::now());
        match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "region logs disabled");
                None
            }
        }
    }
}

fn run_region(
    store: &dyn ImageStore,
    config: &SyncConfig,
    region: &RegionName,
    dry_run: bool,
) -> RegionRun {
    let started = Instant::now();
    tracing::info!(region = %region, dry_run, "region sync started");
    let result = sync_region(store, config, region, dry_run);
    let duration_ms = started.elapsed().as_millis();
    match result {
        Ok(report) => {
            tracing::info!(
                region = %region,
                changes = report.changes(),
                failures = report.failures(),
                duration_ms = duration_ms,
                "region sync completed",
            );
            RegionRun {
                region: region.clone(),
                report: Some(report),
                error: None,
                duration_ms,
            }
        }
        Err(err) => {
            tracing::error!(region = %region, error = %err, "region sync failed");
            RegionRun::failed(region.clone(), err.to_string(), duration_ms)
        }
    }
}

fn write_region_log(dir: &Path, run: &RegionRun) -> Result<(), RunnerError> {
    let mut text = String::new();
    let _ = writeln!(text, "region: {}", run.region);
    let _ = writeln!(text, "duration_ms: {}", run.duration_ms);
    if let Some(report) = &run.report {
        for outcome in &report.outcomes {
            let _ = write!(text, "{} {} {:?}", outcome.name, outcome.status, outcome.action);
            if let Some(error) = &outcome.error {
                let _ = write!(text, " error: {error}");
            }
            text.push('\n');
        }
        for retirement in &report.retirements {
            let _ = writeln!(text, "{} retired as {}", retirement.id, retirement.name);
        }
        for warning in &report.warnings {
            let _ = writeln!(text, "warning: {warning}");
        }
    }
    if let Some(error) = &run.error {
        let _ = writeln!(text, "error: {error}");
    }
    let path = region_log_path(dir, &run.region);
    fs::write(&path, text).map_err(|e| io_err(&path, e))
}

fn write_run_summary(dir: &Path, runs: &[RegionRun]) -> Result<(), RunnerError> {
    let path = run_summary_path(dir);
    let json = serde_json::to_vec_pretty(runs)?;
    fs::write(&path, json).map_err(|e| io_err(&path, e))
}

/// Install the stderr `tracing` subscriber; `RUST_LOG` overrides the `info`
/// default. Records from the `log` facade are forwarded too.
///
/// `GLANCESYNC_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = match std::env::var("GLANCESYNC_LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    use glancesync_core::{
        policy::Policy,
        types::{Image, Visibility, ACTIVE_STATUS},
    };
    use glancesync_sync::MemoryStore;
    use tempfile::TempDir;

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store
            .add_image(
                Image {
                    id: ImageId::from("v1"),
                    name: "base".into(),
                    region: RegionName::from("Valladolid"),
                    owner: "tenant".into(),
                    visibility: Visibility::Public,
                    checksum: "sum".into(),
                    size: 4,
                    status: ACTIVE_STATUS.into(),
                    properties: Map::new(),
                },
                b"base",
            )
            .expect("seed");
        for region in ["Burgos", "Soria", "other:Madrid"] {
            store.add_region(region).expect("region");
        }
        Arc::new(store)
    }

    fn orchestrator(store: Arc<MemoryStore>, tokens: &[&str]) -> Orchestrator {
        let mut config = SyncConfig::new("Valladolid", Policy::new("tenant"));
        config
            .targets
            .insert(TargetName::from("other"), Policy::new("tenant-other"));
        Orchestrator::new(store, config, tokens).expect("orchestrator")
    }

    #[test]
    fn sequential_dry_run_changes_nothing() {
        let store = store();
        let orch = orchestrator(store.clone(), &[]);
        let runs = orch.sequential_sync(true);
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(RegionRun::succeeded));
        assert_eq!(store.mutation_count(), 0);
    }

    #[test]
    fn sequential_sync_isolates_region_failures() {
        let store = store();
        let orch = orchestrator(store.clone(), &["Burgos", "nowhere:Lugo", "Soria"]);
        let runs = orch.sequential_sync(false);

        assert_eq!(runs.len(), 3);
        assert!(runs[0].succeeded());
        assert!(runs[1].error.as_deref().unwrap_or_default().contains("nowhere"));
        assert!(runs[2].succeeded());
        assert_eq!(store.list_images(&RegionName::from("Soria")).unwrap().len(), 1);
    }

    #[test]
    fn backup_exports_master_into_fresh_directory() {
        let base = TempDir::new().expect("tempdir");
        let orch = orchestrator(store(), &[]);
        let dir = orch.make_backup(base.path()).expect("backup");

        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("backup_glance_"));
        assert!(dir.join("backup_Valladolid.json").exists());
    }

    #[test]
    fn status_lists_every_eligible_image() {
        let orch = orchestrator(store(), &["Burgos", "other:"]);
        let status = orch.report_status();
        assert_eq!(status.len(), 2);
        for region in &status {
            assert!(region.error.is_none());
            assert_eq!(region.images.len(), 1);
            assert_eq!(region.images[0].status, SyncStatus::PendingUpload);
        }
    }

    #[test]
    fn show_regions_groups_by_target() {
        let orch = orchestrator(store(), &["master:", "other:"]);
        let grouped = orch.show_regions();
        assert_eq!(
            grouped[&TargetName::master()],
            vec![RegionName::from("Burgos"), RegionName::from("Soria")]
        );
        assert_eq!(
            grouped[&TargetName::from("other")],
            vec![RegionName::from("other:Madrid")]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parallel_sync_writes_region_logs() {
        let logs = TempDir::new().expect("tempdir");
        let orch = orchestrator(store(), &["Burgos", "Soria"]).with_log_dir(logs.path());
        let runs = orch.parallel_sync().await;
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(RegionRun::succeeded));

        let run_dirs: Vec<_> = fs::read_dir(logs.path())
            .expect("read logs")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(run_dirs.len(), 1);
        let burgos = fs::read_to_string(run_dirs[0].path().join("Burgos.txt")).expect("log");
        assert!(burgos.contains("base pending_upload Upload"));

        let summary: serde_json::Value = serde_json::from_slice(
            &fs::read(run_dirs[0].path().join("summary.json")).expect("summary"),
        )
        .expect("summary JSON");
        assert_eq!(summary.as_array().map(Vec::len), Some(2));
        assert_eq!(summary[0]["region"], "Burgos");
    }
}
