//! Per-region reconciliation: pure functions over (master images, local
//! images, policy).
//!
//! Pipeline:
//! 1. [`eligible`]: master images this region accepts, keyed by name.
//! 2. [`resolve_local`]: the single local copy chosen for each eligible name.
//! 3. [`classify`]: base status of every eligible image.
//! 4. dependency override: `kernel_id` / `ramdisk_id` edges, evaluated over
//!    the table produced by step 3 (single hop).
//! 5. [`retirement_updates`]: local copies of `_obsolete` master images that
//!    still need renaming / hiding.
//!
//! [`reconcile`] runs all of them. Nothing here performs I/O; warnings are
//! logged and also returned as [`ReconcileWarning`] values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use glancesync_core::{
    policy::Policy,
    types::{Image, ImageId, SyncStatus, Visibility, DEPENDENCY_KEYS, OBSOLETE_SUFFIX},
};

/// Images keyed by name, the join key between master and region.
pub type ImagesByName = BTreeMap<String, Image>;

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Non-fatal anomaly found while reconciling a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileWarning {
    /// A local copy is owned by a tenant other than the target's.
    ForeignOwner {
        name: String,
        id: ImageId,
        owner: String,
        dropped: bool,
    },
    /// A local copy exists but is not `active`; it is treated as missing.
    InactiveCopy {
        name: String,
        id: ImageId,
        status: String,
    },
    /// Several local images share an eligible name; this one was discarded.
    DuplicateName { name: String, discarded: ImageId },
    /// A `_obsolete` master image was ignored because its base image is live.
    ObsoleteReactivated { obsolete: String, base: String },
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileWarning::ForeignOwner {
                name,
                id,
                owner,
                dropped,
            } => {
                let action = if *dropped { "Ignoring" } else { "Using" };
                write!(f, "{action} image {name} ({id}) owned by another tenant: {owner}")
            }
            ReconcileWarning::InactiveCopy { name, id, status } => {
                write!(f, "Image {name} ({id}) is not active (status: {status}); treated as missing")
            }
            ReconcileWarning::DuplicateName { name, discarded } => {
                write!(f, "There are several images with name {name}; discarding {discarded}")
            }
            ReconcileWarning::ObsoleteReactivated { obsolete, base } => write!(
                f,
                "Ignore obsolete master image {obsolete} because {base} exists and it is synchronisable."
            ),
        }
    }
}

fn warn(warnings: &mut Vec<ReconcileWarning>, warning: ReconcileWarning) {
    tracing::warn!("{warning}");
    warnings.push(warning);
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Status of one eligible master image together with its chosen local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub status: SyncStatus,
    pub master: Image,
    pub local: Option<Image>,
}

impl SyncEntry {
    pub fn name(&self) -> &str {
        &self.master.name
    }
}

/// Local copies selected for the eligible names.
#[derive(Debug, Clone, Default)]
pub struct LocalResolution {
    pub by_name: ImagesByName,
    pub warnings: Vec<ReconcileWarning>,
}

/// Full outcome of reconciling one region.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// One entry per eligible image, ascending by name.
    pub entries: Vec<SyncEntry>,
    /// Corrected local images implementing pending retirements.
    pub retirements: Vec<Image>,
    pub warnings: Vec<ReconcileWarning>,
}

impl Reconciliation {
    pub fn status_of(&self, name: &str) -> Option<SyncStatus> {
        self.entries
            .iter()
            .find(|entry| entry.name() == name)
            .map(|entry| entry.status)
    }

    /// Every eligible image is converged and nothing awaits retirement.
    pub fn is_converged(&self) -> bool {
        self.retirements.is_empty() && self.entries.iter().all(|e| e.status.is_converged())
    }
}

// ---------------------------------------------------------------------------
// 1. Eligibility
// ---------------------------------------------------------------------------

/// Whether a single master image is in scope for the policy's regions.
pub fn is_eligible(image: &Image, policy: &Policy) -> bool {
    if policy.force_sync_ids.contains(&image.id) {
        return true;
    }
    match &policy.metadata_condition {
        Some(condition) => condition.evaluate(image),
        None => {
            image.is_public()
                && (policy.metadata_set.is_empty()
                    || policy
                        .metadata_set
                        .iter()
                        .any(|key| image.properties.contains_key(key)))
        }
    }
}

/// Master images eligible for a region governed by `policy`, keyed by name.
///
/// When the master holds several images with one name, the first wins.
pub fn eligible(master: &[Image], policy: &Policy) -> ImagesByName {
    let mut result = ImagesByName::new();
    for image in master.iter().filter(|img| is_eligible(img, policy)) {
        result
            .entry(image.name.clone())
            .or_insert_with(|| image.clone());
    }
    result
}

// ---------------------------------------------------------------------------
// 2. Local-copy resolution
// ---------------------------------------------------------------------------

/// Pick one local copy per eligible name.
///
/// Copies owned by another tenant are warned about and, with
/// `only_tenant_images`, dropped. Inactive copies are dropped with a warning.
/// Among duplicates the first copy whose checksum matches the master wins,
/// else the first in listing order; every other duplicate yields one warning.
pub fn resolve_local(eligible: &ImagesByName, local: &[Image], policy: &Policy) -> LocalResolution {
    let mut warnings = Vec::new();
    let mut candidates: BTreeMap<&str, Vec<&Image>> = BTreeMap::new();

    for image in local {
        if !eligible.contains_key(&image.name) {
            continue;
        }
        if image.owner != policy.tenant_id {
            let dropped = policy.only_tenant_images;
            warn(
                &mut warnings,
                ReconcileWarning::ForeignOwner {
                    name: image.name.clone(),
                    id: image.id.clone(),
                    owner: image.owner.clone(),
                    dropped,
                },
            );
            if dropped {
                continue;
            }
        }
        if !image.is_active() {
            warn(
                &mut warnings,
                ReconcileWarning::InactiveCopy {
                    name: image.name.clone(),
                    id: image.id.clone(),
                    status: image.status.clone(),
                },
            );
            continue;
        }
        candidates.entry(image.name.as_str()).or_default().push(image);
    }

    let mut by_name = ImagesByName::new();
    for (name, copies) in candidates {
        let master_checksum = &eligible[name].checksum;
        let chosen = copies
            .iter()
            .position(|img| &img.checksum == master_checksum)
            .unwrap_or(0);
        for (idx, copy) in copies.iter().enumerate() {
            if idx != chosen {
                warn(
                    &mut warnings,
                    ReconcileWarning::DuplicateName {
                        name: name.to_string(),
                        discarded: copy.id.clone(),
                    },
                );
            }
        }
        by_name.insert(name.to_string(), copies[chosen].clone());
    }

    LocalResolution { by_name, warnings }
}

// ---------------------------------------------------------------------------
// 3. Base classification
// ---------------------------------------------------------------------------

/// What makes a checksum-equal local copy diverge from its master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drift {
    None,
    /// Only `kernel_id` / `ramdisk_id` need rewriting to local ids.
    ReferencesOnly,
    Metadata,
}

/// Value a dependency property must hold on a local copy.
enum ExpectedRef<'a> {
    Absent,
    Id(&'a str),
    /// The referenced image has no local copy yet.
    Unknown,
}

fn expected_ref<'a>(master: &Image, key: &str, resolved: &'a ImagesByName) -> ExpectedRef<'a> {
    match master.property(key) {
        None => ExpectedRef::Absent,
        Some(name) => match resolved.get(name) {
            Some(dep) => ExpectedRef::Id(&dep.id.0),
            None => ExpectedRef::Unknown,
        },
    }
}

fn drift(master: &Image, local: &Image, resolved: &ImagesByName, policy: &Policy) -> Drift {
    let metadata_differs = master.visibility != local.visibility
        || policy
            .metadata_set
            .iter()
            .filter(|key| !DEPENDENCY_KEYS.contains(&key.as_str()))
            .any(|key| master.properties.get(key) != local.properties.get(key));
    if metadata_differs {
        return Drift::Metadata;
    }

    let refs_differ = DEPENDENCY_KEYS.iter().any(|key| {
        match expected_ref(master, key, resolved) {
            ExpectedRef::Absent => local.properties.contains_key(*key),
            ExpectedRef::Id(id) => local.property(key) != Some(id),
            ExpectedRef::Unknown => false,
        }
    });
    if refs_differ {
        Drift::ReferencesOnly
    } else {
        Drift::None
    }
}

fn base_status(
    master: &Image,
    local: Option<&Image>,
    resolved: &ImagesByName,
    policy: &Policy,
) -> (SyncStatus, Drift) {
    let Some(local) = local else {
        return (SyncStatus::PendingUpload, Drift::None);
    };
    if local.checksum != master.checksum {
        return (policy.checksum_conflict_status(&local.checksum), Drift::None);
    }
    match drift(master, local, resolved, policy) {
        Drift::None => (SyncStatus::Ok, Drift::None),
        d => (SyncStatus::PendingMetadata, d),
    }
}

/// Status of one image before dependency overrides are applied.
pub fn classify(
    master: &Image,
    local: Option<&Image>,
    resolved: &ImagesByName,
    policy: &Policy,
) -> SyncStatus {
    base_status(master, local, resolved, policy).0
}

// ---------------------------------------------------------------------------
// 4. Dependency override
// ---------------------------------------------------------------------------

fn dependency_override(
    master: &Image,
    status: SyncStatus,
    drift: Drift,
    base: &BTreeMap<&str, (SyncStatus, Drift)>,
) -> SyncStatus {
    let mut blocked = false;
    for (_, dep_name) in master.dependencies() {
        match base.get(dep_name) {
            None => return SyncStatus::ErrorAmi,
            Some((dep_status, _)) if !dep_status.is_converged() => blocked = true,
            Some(_) => {}
        }
    }
    let rewrite_only = status == SyncStatus::PendingMetadata && drift == Drift::ReferencesOnly;
    if blocked && !rewrite_only {
        SyncStatus::PendingAmi
    } else {
        status
    }
}

// ---------------------------------------------------------------------------
// 5. Retirement
// ---------------------------------------------------------------------------

/// Corrected local images for every `<base>_obsolete` master image.
///
/// A local image qualifies when it is named `<base>` or `<base>_obsolete`,
/// has the master twin's checksum, and is owned by the twin's owner or by the
/// target tenant. It is emitted renamed, private, and with `tracked_keys`
/// copied from the twin, unless it already looks exactly like that.
pub fn retirement_updates(
    master: &[Image],
    local: &[Image],
    policy: &Policy,
    tracked_keys: &BTreeSet<String>,
) -> (Vec<Image>, Vec<ReconcileWarning>) {
    let mut updates = Vec::new();
    let mut warnings = Vec::new();

    let mut twins: Vec<&Image> = master
        .iter()
        .filter(|img| img.obsoleted_name().is_some())
        .collect();
    twins.sort_by(|a, b| a.name.cmp(&b.name));

    for twin in twins {
        let Some(base) = twin.obsoleted_name() else {
            continue;
        };
        let live = master
            .iter()
            .any(|img| img.name == base && is_eligible(img, policy));
        if live {
            warn(
                &mut warnings,
                ReconcileWarning::ObsoleteReactivated {
                    obsolete: twin.name.clone(),
                    base: base.to_string(),
                },
            );
            continue;
        }

        for candidate in local {
            let same_name = candidate.name == base || candidate.name == twin.name;
            let same_owner = candidate.owner == twin.owner || candidate.owner == policy.tenant_id;
            if !same_name || candidate.checksum != twin.checksum || !same_owner {
                continue;
            }
            let converged = candidate.name == twin.name
                && !candidate.is_public()
                && tracked_keys
                    .iter()
                    .all(|key| candidate.properties.get(key) == twin.properties.get(key));
            if converged {
                continue;
            }

            let mut corrected = candidate.clone();
            corrected.name = twin.name.clone();
            corrected.visibility = Visibility::Private;
            copy_keys(&mut corrected, twin, tracked_keys.iter());
            updates.push(corrected);
        }
    }

    (updates, warnings)
}

// ---------------------------------------------------------------------------
// Full pass
// ---------------------------------------------------------------------------

/// Reconcile one region: statuses for every eligible image, pending
/// retirements, and every warning raised on the way.
pub fn reconcile(master: &[Image], local: &[Image], policy: &Policy) -> Reconciliation {
    let eligible = eligible(master, policy);
    let LocalResolution {
        by_name: resolved,
        mut warnings,
    } = resolve_local(&eligible, local, policy);

    let base: BTreeMap<&str, (SyncStatus, Drift)> = eligible
        .iter()
        .map(|(name, img)| {
            (
                name.as_str(),
                base_status(img, resolved.get(name), &resolved, policy),
            )
        })
        .collect();

    let entries = eligible
        .iter()
        .map(|(name, img)| {
            let (status, drift) = base[name.as_str()];
            SyncEntry {
                status: dependency_override(img, status, drift, &base),
                master: img.clone(),
                local: resolved.get(name).cloned(),
            }
        })
        .collect();

    let (retirements, retirement_warnings) =
        retirement_updates(master, local, policy, &policy.metadata_set);
    warnings.extend(retirement_warnings);

    Reconciliation {
        entries,
        retirements,
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Image to upload for `master`: its metadata, owned by the target tenant,
/// with dependency references rewritten to local ids.
pub fn upload_request(master: &Image, resolved: &ImagesByName, policy: &Policy) -> Image {
    let mut image = master.clone();
    image.owner = policy.tenant_id.clone();
    rewrite_references(&mut image, master, resolved);
    image
}

/// `local` with visibility, tracked properties and dependency references
/// brought in line with `master`.
pub fn converged_copy(
    master: &Image,
    local: &Image,
    resolved: &ImagesByName,
    policy: &Policy,
) -> Image {
    let mut image = local.clone();
    image.visibility = master.visibility;
    copy_keys(
        &mut image,
        master,
        policy
            .metadata_set
            .iter()
            .filter(|key| !DEPENDENCY_KEYS.contains(&key.as_str())),
    );
    rewrite_references(&mut image, master, resolved);
    image
}

fn rewrite_references(image: &mut Image, master: &Image, resolved: &ImagesByName) {
    for key in DEPENDENCY_KEYS {
        match expected_ref(master, key, resolved) {
            ExpectedRef::Absent => {
                image.properties.remove(key);
            }
            ExpectedRef::Id(id) => {
                image.properties.insert(key.to_string(), id.to_string());
            }
            ExpectedRef::Unknown => {
                image.properties.remove(key);
            }
        }
    }
}

fn copy_keys<'a>(image: &mut Image, from: &Image, keys: impl Iterator<Item = &'a String>) {
    for key in keys {
        match from.properties.get(key) {
            Some(value) => {
                image.properties.insert(key.clone(), value.clone());
            }
            None => {
                image.properties.remove(key);
            }
        }
    }
}

/// Name a conflicting local copy is moved aside to before re-upload.
pub fn renamed_aside(name: &str) -> String {
    format!("{name}.old")
}

/// Whether `name` carries the retirement suffix.
pub fn is_obsolete_name(name: &str) -> bool {
    name.ends_with(OBSOLETE_SUFFIX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
