use std::collections::BTreeMap;
use std::path::Path;

use rstest::rstest;

use glancesync_core::{
    config::SyncConfig,
    policy::Policy,
    types::{
        Image, ImageId, RegionName, SyncStatus, TargetName, Visibility, ACTIVE_STATUS, KERNEL_ID,
        RAMDISK_ID,
    },
};
use glancesync_sync::{
    region_status, sync_region, ImageStore, MemoryStore, ReconcileWarning, StoreError, SyncAction,
    SyncError,
};

const MASTER: &str = "Valladolid";
const REGION: &str = "Burgos";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn image(region: &str, id: &str, name: &str, checksum: &str) -> Image {
    Image {
        id: ImageId::from(id),
        name: name.into(),
        region: RegionName::from(region),
        owner: "tenant-va".into(),
        visibility: Visibility::Public,
        checksum: checksum.into(),
        size: 16,
        status: ACTIVE_STATUS.into(),
        properties: BTreeMap::new(),
    }
}

fn config() -> SyncConfig {
    SyncConfig::new(MASTER, Policy::new("tenant-va"))
}

fn region() -> RegionName {
    RegionName::from(REGION)
}

/// Master with a kernel, a ramdisk, an AMI using both, and a private image.
fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .add_image(image(MASTER, "k1", "kernel", "sum-k"), b"kernel-bytes")
        .unwrap();
    store
        .add_image(image(MASTER, "r1", "ramdisk", "sum-r"), b"ramdisk-bytes")
        .unwrap();
    let mut ami = image(MASTER, "a1", "ami", "sum-a");
    ami.properties.insert(KERNEL_ID.into(), "kernel".into());
    ami.properties.insert(RAMDISK_ID.into(), "ramdisk".into());
    store.add_image(ami, b"ami-bytes").unwrap();
    let mut private = image(MASTER, "p1", "private", "sum-p");
    private.visibility = Visibility::Private;
    store.add_image(private, b"private-bytes").unwrap();
    store.add_region(REGION).unwrap();
    store
}

fn local_by_name(store: &MemoryStore, name: &str) -> Vec<Image> {
    store
        .list_images(&region())
        .unwrap()
        .into_iter()
        .filter(|img| img.name == name)
        .collect()
}

#[test]
fn empty_region_converges_in_one_run() {
    init_logging();
    let store = seeded_store();
    let report = sync_region(&store, &config(), &region(), false).expect("sync");

    assert_eq!(report.passes, 2);
    assert_eq!(report.failures(), 0);
    for name in ["ami", "kernel", "ramdisk"] {
        let outcome = report.outcome(name).expect("outcome");
        assert_eq!(outcome.action, SyncAction::Upload, "{name}");
    }
    assert!(report.outcome("private").is_none());

    let kernel = &local_by_name(&store, "kernel")[0];
    let ramdisk = &local_by_name(&store, "ramdisk")[0];
    let ami = &local_by_name(&store, "ami")[0];
    assert_eq!(ami.property(KERNEL_ID), Some(kernel.id.0.as_str()));
    assert_eq!(ami.property(RAMDISK_ID), Some(ramdisk.id.0.as_str()));
    assert_eq!(ami.owner, "tenant-va");
    assert_eq!(
        store.download(&region(), &ami.id).unwrap(),
        b"ami-bytes".to_vec()
    );
}

#[test]
fn second_run_on_converged_region_changes_nothing() {
    let store = seeded_store();
    sync_region(&store, &config(), &region(), false).expect("first sync");
    let before = store.mutation_count();

    let report = sync_region(&store, &config(), &region(), false).expect("second sync");
    assert_eq!(store.mutation_count(), before);
    assert_eq!(report.passes, 1);
    assert_eq!(report.changes(), 0);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == SyncStatus::Ok && o.action == SyncAction::Nothing));

    let status = region_status(&store, &config(), &region()).expect("status");
    assert!(status.is_converged());
}

#[test]
fn dry_run_issues_no_mutations() {
    let store = seeded_store();
    let report = sync_region(&store, &config(), &region(), true).expect("dry run");

    assert_eq!(store.mutation_count(), 0);
    assert!(store.list_images(&region()).unwrap().is_empty());
    assert!(report.dry_run);
    assert_eq!(report.outcome("kernel").unwrap().action, SyncAction::Upload);
    assert_eq!(report.outcome("ami").unwrap().action, SyncAction::Deferred);
    assert_eq!(report.unresolved(), 1);
}

#[test]
fn inactive_copy_is_reuploaded() {
    let store = seeded_store();
    let mut stuck = image(REGION, "b-k", "kernel", "sum-k");
    stuck.status = "saving".into();
    store.add_image(stuck, b"").unwrap();

    let report = sync_region(&store, &config(), &region(), false).expect("sync");
    assert_eq!(
        report.outcome("kernel").unwrap().status,
        SyncStatus::PendingUpload
    );
    assert!(report.warnings.iter().any(|w| matches!(
        w,
        ReconcileWarning::InactiveCopy { id, .. } if id == &ImageId::from("b-k")
    )));
    assert_eq!(local_by_name(&store, "kernel").len(), 2);
}

#[test]
fn metadata_drift_is_updated_in_place() {
    let store = seeded_store();
    let mut policy = Policy::new("tenant-va");
    policy.metadata_set.insert("release".into());
    let config = SyncConfig::new(MASTER, policy);

    let mut master = image(MASTER, "n1", "noble", "sum-n");
    master.properties.insert("release".into(), "24.04.1".into());
    store.add_image(master, b"noble").unwrap();
    let mut local = image(REGION, "b-n", "noble", "sum-n");
    local.properties.insert("release".into(), "24.04".into());
    local.visibility = Visibility::Private;
    store.add_image(local, b"noble").unwrap();

    let report = sync_region(&store, &config, &region(), false).expect("sync");
    assert_eq!(
        report.outcome("noble").unwrap().action,
        SyncAction::UpdateMetadata
    );
    let updated = store.get(&region(), &ImageId::from("b-n")).unwrap();
    assert_eq!(updated.property("release"), Some("24.04.1"));
    assert_eq!(updated.visibility, Visibility::Public);
}

#[test]
fn replace_deletes_then_uploads() {
    let store = seeded_store();
    let mut policy = Policy::new("tenant-va");
    policy.replace_checksums.insert("sum-old".into());
    let config = SyncConfig::new(MASTER, policy);
    store
        .add_image(image(REGION, "b-k", "kernel", "sum-old"), b"old")
        .unwrap();

    let report = sync_region(&store, &config, &region(), false).expect("sync");
    assert_eq!(report.outcome("kernel").unwrap().action, SyncAction::Replace);
    assert!(store.get(&region(), &ImageId::from("b-k")).is_none());
    let copies = local_by_name(&store, "kernel");
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].checksum, "sum-k");
}

#[test]
fn rename_moves_old_copy_aside() {
    let store = seeded_store();
    let mut policy = Policy::new("tenant-va");
    policy.rename_checksums.insert("any".into());
    let config = SyncConfig::new(MASTER, policy);
    store
        .add_image(image(REGION, "b-k", "kernel", "sum-old"), b"old")
        .unwrap();

    let report = sync_region(&store, &config, &region(), false).expect("sync");
    assert_eq!(report.outcome("kernel").unwrap().action, SyncAction::Rename);
    let aside = store.get(&region(), &ImageId::from("b-k")).unwrap();
    assert_eq!(aside.name, "kernel.old");
    assert_eq!(aside.visibility, Visibility::Private);
    assert_eq!(local_by_name(&store, "kernel")[0].checksum, "sum-k");
}

#[rstest]
#[case::replaced("replace")]
#[case::renamed("rename")]
fn reference_rewrite_waits_for_reuploaded_kernel(#[case] resolution: &str) {
    let store = seeded_store();
    let mut policy = Policy::new("tenant-va");
    match resolution {
        "replace" => policy.replace_checksums.insert("sum-old".into()),
        _ => policy.rename_checksums.insert("sum-old".into()),
    };
    let config = SyncConfig::new(MASTER, policy);
    store
        .add_image(image(REGION, "b-k", "kernel", "sum-old"), b"old")
        .unwrap();
    store
        .add_image(image(REGION, "b-r", "ramdisk", "sum-r"), b"ramdisk-bytes")
        .unwrap();
    let mut ami = image(REGION, "b-a", "ami", "sum-a");
    ami.properties.insert(KERNEL_ID.into(), "wrong".into());
    ami.properties.insert(RAMDISK_ID.into(), "b-r".into());
    store.add_image(ami, b"ami-bytes").unwrap();

    let report = sync_region(&store, &config, &region(), false).expect("sync");
    assert_eq!(report.failures(), 0);
    assert_eq!(report.unresolved(), 0);
    assert_eq!(report.passes, 2);
    assert_eq!(
        report.outcome("ami").unwrap().action,
        SyncAction::UpdateMetadata
    );

    let kernel = local_by_name(&store, "kernel");
    assert_eq!(kernel.len(), 1);
    assert_eq!(kernel[0].checksum, "sum-k");
    let ami = store.get(&region(), &ImageId::from("b-a")).unwrap();
    assert_eq!(ami.property(KERNEL_ID), Some(kernel[0].id.0.as_str()));
    assert_eq!(ami.property(RAMDISK_ID), Some("b-r"));

    let status = region_status(&store, &config, &region()).expect("status");
    assert!(status.is_converged());
}

#[test]
fn checksum_error_is_reported_and_blocks_dependents() {
    let store = seeded_store();
    store
        .add_image(image(REGION, "b-k", "kernel", "sum-mystery"), b"?")
        .unwrap();

    let report = sync_region(&store, &config(), &region(), false).expect("sync");
    let kernel = report.outcome("kernel").unwrap();
    assert_eq!(kernel.status, SyncStatus::ErrorChecksum);
    assert_eq!(kernel.action, SyncAction::Reported);
    assert_eq!(
        report.outcome("ami").unwrap().status,
        SyncStatus::PendingAmi
    );
    assert_eq!(
        store.get(&region(), &ImageId::from("b-k")).unwrap().checksum,
        "sum-mystery"
    );
    assert!(local_by_name(&store, "ami").is_empty());
}

#[test]
fn retired_master_image_hides_local_copy() {
    let store = seeded_store();
    let mut retired = image(MASTER, "l1", "legacy_obsolete", "sum-l");
    retired.visibility = Visibility::Private;
    store.add_image(retired, b"legacy").unwrap();
    store
        .add_image(image(REGION, "b-l", "legacy", "sum-l"), b"legacy")
        .unwrap();

    let report = sync_region(&store, &config(), &region(), false).expect("sync");
    assert_eq!(report.retirements.len(), 1);
    let local = store.get(&region(), &ImageId::from("b-l")).unwrap();
    assert_eq!(local.name, "legacy_obsolete");
    assert!(!local.is_public());
}

#[test]
fn inactive_master_images_are_ignored() {
    let store = seeded_store();
    let mut queued = image(MASTER, "q1", "queued", "sum-q");
    queued.status = "queued".into();
    store.add_image(queued, b"").unwrap();

    let report = sync_region(&store, &config(), &region(), false).expect("sync");
    assert!(report.outcome("queued").is_none());
}

#[test]
fn unknown_target_fails_before_listing() {
    let store = seeded_store();
    let err = sync_region(&store, &config(), &RegionName::from("nowhere:Soria"), false)
        .expect_err("unknown target");
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn missing_region_is_a_store_error() {
    let store = seeded_store();
    let err = sync_region(&store, &config(), &RegionName::from("Soria"), false)
        .expect_err("missing region");
    assert!(matches!(
        err,
        SyncError::Store(StoreError::RegionNotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Per-image failure isolation
// ---------------------------------------------------------------------------

struct FlakyStore {
    inner: MemoryStore,
    reject: &'static str,
}

impl ImageStore for FlakyStore {
    fn list_images(&self, region: &RegionName) -> Result<Vec<Image>, StoreError> {
        self.inner.list_images(region)
    }

    fn download(&self, region: &RegionName, id: &ImageId) -> Result<Vec<u8>, StoreError> {
        self.inner.download(region, id)
    }

    fn upload(
        &self,
        region: &RegionName,
        image: &Image,
        content: &[u8],
    ) -> Result<ImageId, StoreError> {
        if image.name == self.reject {
            return Err(StoreError::Backend("quota exceeded".into()));
        }
        self.inner.upload(region, image, content)
    }

    fn update_metadata(&self, region: &RegionName, image: &Image) -> Result<(), StoreError> {
        self.inner.update_metadata(region, image)
    }

    fn delete(&self, region: &RegionName, id: &ImageId) -> Result<(), StoreError> {
        self.inner.delete(region, id)
    }

    fn list_target_regions(&self, target: &TargetName) -> Result<Vec<RegionName>, StoreError> {
        self.inner.list_target_regions(target)
    }

    fn export_metadata(&self, region: &RegionName, destination: &Path) -> Result<(), StoreError> {
        self.inner.export_metadata(region, destination)
    }
}

#[test]
fn failed_upload_is_recorded_and_others_proceed() {
    let store = FlakyStore {
        inner: seeded_store(),
        reject: "ramdisk",
    };
    let report = sync_region(&store, &config(), &region(), false).expect("sync");

    let ramdisk = report.outcome("ramdisk").unwrap();
    assert!(ramdisk.error.as_deref().unwrap_or_default().contains("quota exceeded"));
    assert!(report.outcome("kernel").unwrap().error.is_none());
    assert_eq!(report.outcome("ami").unwrap().action, SyncAction::Deferred);
    assert_eq!(report.failures(), 1);
    assert_eq!(local_by_name(&store.inner, "kernel").len(), 1);
}
