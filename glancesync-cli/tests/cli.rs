use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use glancesync_core::{
    config::{self, SyncConfig},
    policy::Policy,
    types::{Image, ImageId, RegionName, Visibility, ACTIVE_STATUS},
};
use glancesync_sync::{ImageStore, MemoryStore};

const MASTER: &str = "Valladolid";
const REGION: &str = "Burgos";

struct Deployment {
    home: TempDir,
    config: PathBuf,
    store: PathBuf,
}

impl Deployment {
    /// Master with two public images, an empty `Burgos` and an empty `other:Soria`.
    fn new() -> Self {
        let home = TempDir::new().expect("home");
        let config = home.path().join("config.yaml");
        let store = home.path().join("store");

        let mut sync_config = SyncConfig::new(MASTER, Policy::new("tenant-va"));
        sync_config
            .targets
            .insert("other".into(), Policy::new("tenant-other"));
        config::save_at(&config, &sync_config).expect("save config");

        let seeded = MemoryStore::open_at(&store).expect("open store");
        seeded
            .add_image(image("m1", "focal", "sum-focal"), b"focal-bytes")
            .expect("seed focal");
        seeded
            .add_image(image("m2", "noble", "sum-noble"), b"noble-bytes")
            .expect("seed noble");
        seeded.add_region(REGION).expect("seed Burgos");
        seeded.add_region("other:Soria").expect("seed Soria");

        Self {
            home,
            config,
            store,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("glancesync"));
        cmd.env("HOME", self.home.path())
            .env("USERPROFILE", self.home.path())
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(&self.config)
            .arg("--store")
            .arg(&self.store);
        cmd
    }

    fn local_images(&self) -> Vec<Image> {
        MemoryStore::open_at(&self.store)
            .expect("reopen store")
            .list_images(&RegionName::from(REGION))
            .expect("list Burgos")
    }
}

fn image(id: &str, name: &str, checksum: &str) -> Image {
    Image {
        id: ImageId::from(id),
        name: name.into(),
        region: RegionName::from(MASTER),
        owner: "tenant-va".into(),
        visibility: Visibility::Public,
        checksum: checksum.into(),
        size: 11,
        status: ACTIVE_STATUS.into(),
        properties: BTreeMap::new(),
    }
}

fn status_json(deployment: &Deployment) -> serde_json::Value {
    let output = deployment
        .cmd()
        .args(["status", "--json"])
        .output()
        .expect("run glancesync status --json");
    assert!(
        output.status.success(),
        "status failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("status JSON")
}

fn dir_starting_with(base: &Path, prefix: &str) -> PathBuf {
    fs::read_dir(base)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .unwrap_or_else(|| panic!("no {prefix}* directory in {}", base.display()))
}

#[test]
fn dry_run_reports_uploads_and_changes_nothing() {
    let deployment = Deployment::new();

    deployment
        .cmd()
        .args(["sync", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("[dry-run]"))
        .stdout(contains("'Burgos' synced (2 changed"))
        .stdout(contains("focal (pending_upload)"));

    assert!(deployment.local_images().is_empty());
}

#[test]
fn sync_converges_region_and_status_reports_ok() {
    let deployment = Deployment::new();

    let before = status_json(&deployment);
    assert_eq!(before["summary"]["pending"], 2);

    deployment
        .cmd()
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("'Burgos' synced"));

    let mut names: Vec<String> = deployment
        .local_images()
        .into_iter()
        .map(|img| img.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["focal", "noble"]);

    let after = status_json(&deployment);
    assert_eq!(after["summary"]["pending"], 0);
    assert_eq!(after["summary"]["errors"], 0);
    let images = after["regions"][0]["images"].as_array().expect("images");
    assert_eq!(images.len(), 2);
    assert!(images.iter().all(|row| row["status"] == "ok"));

    deployment
        .cmd()
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("'Burgos' already in sync"));
}

#[test]
fn status_table_lists_pending_images() {
    let deployment = Deployment::new();

    deployment
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(contains("GlanceSync v"))
        .stdout(contains("BURGOS"))
        .stdout(contains("pending_upload"))
        .stdout(contains("Run 'glancesync sync'"));
}

#[test]
fn unknown_region_fails_sync() {
    let deployment = Deployment::new();

    deployment
        .cmd()
        .args(["sync", "Segovia"])
        .assert()
        .failure()
        .stdout(contains("'Segovia' failed"))
        .stderr(contains("sync failed for Segovia"));
}

#[test]
fn parallel_sync_writes_region_logs() {
    let deployment = Deployment::new();
    let logs = TempDir::new().expect("logs");

    deployment
        .cmd()
        .args(["sync", "--parallel", "master:", "other:", "--log-dir"])
        .arg(logs.path())
        .assert()
        .success();

    let run_dir = dir_starting_with(logs.path(), "sync_");
    assert!(run_dir.join("Burgos.txt").exists());
    assert!(run_dir.join("other:Soria.txt").exists());
    assert_eq!(deployment.local_images().len(), 2);
}

#[test]
fn parallel_and_dry_run_conflict() {
    let deployment = Deployment::new();

    deployment
        .cmd()
        .args(["sync", "--parallel", "--dry-run"])
        .assert()
        .failure()
        .stderr(contains("cannot be used with"));
}

#[test]
fn backup_exports_master_region() {
    let deployment = Deployment::new();
    let target = TempDir::new().expect("backups");

    deployment
        .cmd()
        .args(["backup", "--dir"])
        .arg(target.path())
        .assert()
        .success()
        .stdout(contains("backed up to"));

    let backup = dir_starting_with(target.path(), "backup_glance_");
    let restored = MemoryStore::new();
    assert_eq!(restored.import_backup_dir(&backup).expect("import"), 1);
    assert_eq!(
        restored
            .list_images(&RegionName::from(MASTER))
            .expect("list master")
            .len(),
        2
    );
}

#[test]
fn regions_groups_by_target() {
    let deployment = Deployment::new();

    let output = deployment
        .cmd()
        .args(["regions", "master:", "other:"])
        .output()
        .expect("run glancesync regions");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");

    assert!(stdout.contains("master"));
    assert!(stdout.contains("  Burgos"));
    assert!(stdout.contains("other"));
    assert!(stdout.contains("  Soria"));
    assert!(!stdout.contains("  Valladolid"));
}
