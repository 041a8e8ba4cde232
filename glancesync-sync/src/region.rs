//! Region synchronizer: drives one region towards the master catalog.
//!
//! ## `sync_region` flow
//!
//! 1. List the master region (inactive master images are skipped).
//! 2. List the region and [`reconcile`].
//! 3. Act on every actionable status; record the outcome per image. An
//!    image whose kernel / ramdisk gets a new local id in this pass is
//!    deferred so its references are rewritten against that id.
//! 4. Apply pending retirements.
//! 5. If images were deferred and the pass made progress,
//!    re-list and act again on the deferred images only.
//!
//! A failing store call is recorded on the image's outcome and the pass
//! continues. Only listing failures abort the region.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use glancesync_core::{
    config::SyncConfig,
    policy::Policy,
    types::{Image, ImageId, RegionName, SyncStatus, Visibility},
};

use crate::error::SyncError;
use crate::gateway::{ImageStore, StoreError};
use crate::reconciler::{
    converged_copy, reconcile, renamed_aside, upload_request, ImagesByName, ReconcileWarning,
    Reconciliation, SyncEntry,
};

/// Upper bound on reconcile/act rounds in one run.
const MAX_PASSES: usize = 4;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What the synchronizer does for a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Already converged.
    Nothing,
    Upload,
    UpdateMetadata,
    /// Delete the local copy, then upload.
    Replace,
    /// Move the local copy aside, then upload.
    Rename,
    /// Waiting for a kernel / ramdisk dependency.
    Deferred,
    /// Terminal error status, left for an operator.
    Reported,
}

impl SyncAction {
    pub fn for_status(status: SyncStatus) -> Self {
        match status {
            SyncStatus::Ok | SyncStatus::OkStalledChecksum => SyncAction::Nothing,
            SyncStatus::PendingUpload => SyncAction::Upload,
            SyncStatus::PendingMetadata => SyncAction::UpdateMetadata,
            SyncStatus::PendingReplace => SyncAction::Replace,
            SyncStatus::PendingRename => SyncAction::Rename,
            SyncStatus::PendingAmi => SyncAction::Deferred,
            SyncStatus::ErrorChecksum | SyncStatus::ErrorAmi => SyncAction::Reported,
        }
    }

    /// Whether the action issues mutating store calls.
    pub fn mutates(self) -> bool {
        matches!(
            self,
            SyncAction::Upload | SyncAction::UpdateMetadata | SyncAction::Replace | SyncAction::Rename
        )
    }
}

/// Result of processing one eligible image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageOutcome {
    pub name: String,
    /// Status the image had when it was acted upon.
    pub status: SyncStatus,
    pub action: SyncAction,
    /// Id of the freshly uploaded copy, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_id: Option<ImageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of renaming / hiding one local copy of a retired image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetirementOutcome {
    pub id: ImageId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one `sync_region` run did.
#[derive(Debug, Clone, Serialize)]
pub struct RegionSyncReport {
    pub region: RegionName,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Reconcile/act rounds performed.
    pub passes: usize,
    /// Ascending by image name.
    pub outcomes: Vec<ImageOutcome>,
    pub retirements: Vec<RetirementOutcome>,
    pub warnings: Vec<ReconcileWarning>,
}

impl RegionSyncReport {
    pub fn outcome(&self, name: &str) -> Option<&ImageOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Number of store operations that failed.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed()).count()
            + self.retirements.iter().filter(|r| r.error.is_some()).count()
    }

    /// Images whose action changes the region.
    pub fn changes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.action.mutates()).count() + self.retirements.len()
    }

    /// Images left for an operator or blocked on a dependency.
    pub fn unresolved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.action, SyncAction::Deferred | SyncAction::Reported))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Active images of the master region.
pub fn master_images(store: &dyn ImageStore, master: &RegionName) -> Result<Vec<Image>, SyncError> {
    let mut images = store.list_images(master)?;
    images.retain(|img| {
        if !img.is_active() {
            tracing::warn!(
                "Skipping master image {} ({}): status is {}",
                img.name,
                img.id,
                img.status
            );
        }
        img.is_active()
    });
    Ok(images)
}

/// Read-only reconciliation of `region` against the master.
pub fn region_status(
    store: &dyn ImageStore,
    config: &SyncConfig,
    region: &RegionName,
) -> Result<Reconciliation, SyncError> {
    let policy = config.policy_for(region)?;
    let master = master_images(store, &config.master_region)?;
    let local = store.list_images(region)?;
    Ok(reconcile(&master, &local, policy))
}

/// Bring `region` in line with the master catalog.
///
/// With `dry_run`, only listing calls are issued and every outcome shows the
/// action that would have been taken.
pub fn sync_region(
    store: &dyn ImageStore,
    config: &SyncConfig,
    region: &RegionName,
    dry_run: bool,
) -> Result<RegionSyncReport, SyncError> {
    let started_at = Utc::now();
    let policy = config.policy_for(region)?;
    let master = master_images(store, &config.master_region)?;
    let ctx = Context {
        store,
        policy,
        master_region: &config.master_region,
        region,
    };

    let mut outcomes: Vec<ImageOutcome> = Vec::new();
    let mut retirements = Vec::new();
    let mut warnings = Vec::new();
    let mut deferred: Option<BTreeSet<String>> = None;
    let mut passes = 0;

    while passes < MAX_PASSES {
        passes += 1;
        let local = store.list_images(region)?;
        let plan = reconcile(&master, &local, policy);
        let resolved: ImagesByName = plan
            .entries
            .iter()
            .filter_map(|e| e.local.clone().map(|l| (e.name().to_string(), l)))
            .collect();

        let in_pass: Vec<&SyncEntry> = plan
            .entries
            .iter()
            .filter(|e| deferred.as_ref().map_or(true, |w| w.contains(e.name())))
            .collect();
        // Names that get a new local id in this pass; references to them are
        // only rewritten once that id exists.
        let renewing: BTreeSet<&str> = in_pass
            .iter()
            .copied()
            .filter(|e| {
                matches!(
                    e.status,
                    SyncStatus::PendingUpload | SyncStatus::PendingReplace | SyncStatus::PendingRename
                )
            })
            .map(|e| e.name())
            .collect();

        let mut progressed = false;
        let mut still_deferred = BTreeSet::new();
        for entry in in_pass {
            let outcome = if waits_on_renewal(entry, &renewing) {
                ctx.defer(entry)
            } else {
                ctx.apply(entry, &resolved, dry_run)
            };
            if outcome.action == SyncAction::Deferred {
                still_deferred.insert(outcome.name.clone());
            } else if outcome.action.mutates() && !outcome.failed() {
                progressed = true;
            }
            outcomes.retain(|o| o.name != outcome.name);
            outcomes.push(outcome);
        }

        if deferred.is_none() {
            warnings = plan.warnings;
            for image in &plan.retirements {
                retirements.push(ctx.retire(image, dry_run));
            }
        }

        if dry_run || still_deferred.is_empty() || !progressed {
            break;
        }
        tracing::debug!(
            "{region}: {} image(s) waiting on dependencies, re-listing",
            still_deferred.len()
        );
        deferred = Some(still_deferred);
    }

    outcomes.sort_by(|a, b| a.name.cmp(&b.name));
    let report = RegionSyncReport {
        region: region.clone(),
        dry_run,
        started_at,
        finished_at: Utc::now(),
        passes,
        outcomes,
        retirements,
        warnings,
    };
    tracing::info!(
        "{region}: {} change(s), {} failure(s), {} unresolved",
        report.changes(),
        report.failures(),
        report.unresolved()
    );
    Ok(report)
}

/// A mutating entry whose kernel / ramdisk is re-uploaded in the same pass.
fn waits_on_renewal(entry: &SyncEntry, renewing: &BTreeSet<&str>) -> bool {
    SyncAction::for_status(entry.status).mutates()
        && entry
            .master
            .dependencies()
            .any(|(_, dep)| dep != entry.name() && renewing.contains(dep))
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

struct Context<'a> {
    store: &'a dyn ImageStore,
    policy: &'a Policy,
    master_region: &'a RegionName,
    region: &'a RegionName,
}

impl Context<'_> {
    fn apply(&self, entry: &SyncEntry, resolved: &ImagesByName, dry_run: bool) -> ImageOutcome {
        let action = SyncAction::for_status(entry.status);
        let mut outcome = ImageOutcome {
            name: entry.name().to_string(),
            status: entry.status,
            action,
            uploaded_id: None,
            error: None,
        };
        if !action.mutates() {
            return outcome;
        }
        if dry_run {
            tracing::info!("[dry-run] {}: {:?} {}", self.region, action, outcome.name);
            return outcome;
        }
        match self.execute(entry, resolved) {
            Ok(uploaded) => {
                tracing::info!("{}: {:?} {}", self.region, action, outcome.name);
                outcome.uploaded_id = uploaded;
            }
            Err(e) => {
                tracing::error!("{}: {:?} {} failed: {e}", self.region, action, outcome.name);
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    fn defer(&self, entry: &SyncEntry) -> ImageOutcome {
        tracing::debug!(
            "{}: {} waits for its dependencies to be re-uploaded",
            self.region,
            entry.name()
        );
        ImageOutcome {
            name: entry.name().to_string(),
            status: entry.status,
            action: SyncAction::Deferred,
            uploaded_id: None,
            error: None,
        }
    }

    fn execute(
        &self,
        entry: &SyncEntry,
        resolved: &ImagesByName,
    ) -> Result<Option<ImageId>, StoreError> {
        match entry.status {
            SyncStatus::PendingUpload => self.upload(&entry.master, resolved).map(Some),
            SyncStatus::PendingMetadata => {
                let local = self.local_copy(entry)?;
                let fixed = converged_copy(&entry.master, local, resolved, self.policy);
                self.store.update_metadata(self.region, &fixed)?;
                Ok(None)
            }
            SyncStatus::PendingReplace => {
                let local = self.local_copy(entry)?;
                self.store.delete(self.region, &local.id)?;
                self.upload(&entry.master, resolved).map(Some)
            }
            SyncStatus::PendingRename => {
                let local = self.local_copy(entry)?;
                let mut aside = local.clone();
                aside.name = renamed_aside(&local.name);
                aside.visibility = Visibility::Private;
                self.store.update_metadata(self.region, &aside)?;
                self.upload(&entry.master, resolved).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn upload(&self, master: &Image, resolved: &ImagesByName) -> Result<ImageId, StoreError> {
        let content = self.store.download(self.master_region, &master.id)?;
        let request = upload_request(master, resolved, self.policy);
        self.store.upload(self.region, &request, &content)
    }

    fn local_copy<'e>(&self, entry: &'e SyncEntry) -> Result<&'e Image, StoreError> {
        entry.local.as_ref().ok_or_else(|| {
            StoreError::Backend(format!(
                "no local copy of {} in region {}",
                entry.name(),
                self.region
            ))
        })
    }

    fn retire(&self, image: &Image, dry_run: bool) -> RetirementOutcome {
        let mut outcome = RetirementOutcome {
            id: image.id.clone(),
            name: image.name.clone(),
            error: None,
        };
        if dry_run {
            tracing::info!("[dry-run] {}: retire {} as {}", self.region, image.id, image.name);
            return outcome;
        }
        if let Err(e) = self.store.update_metadata(self.region, image) {
            tracing::error!("{}: retiring {} failed: {e}", self.region, image.id);
            outcome.error = Some(e.to_string());
        } else {
            tracing::info!("{}: retired {} as {}", self.region, image.id, image.name);
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_status_maps_to_an_action() {
        assert_eq!(SyncAction::for_status(SyncStatus::Ok), SyncAction::Nothing);
        assert_eq!(
            SyncAction::for_status(SyncStatus::OkStalledChecksum),
            SyncAction::Nothing
        );
        assert_eq!(
            SyncAction::for_status(SyncStatus::PendingAmi),
            SyncAction::Deferred
        );
        assert_eq!(
            SyncAction::for_status(SyncStatus::ErrorAmi),
            SyncAction::Reported
        );
        assert!(SyncAction::for_status(SyncStatus::PendingRename).mutates());
        assert!(!SyncAction::for_status(SyncStatus::ErrorChecksum).mutates());
    }

    #[test]
    fn outcome_serializes_without_empty_fields() {
        let outcome = ImageOutcome {
            name: "image01".into(),
            status: SyncStatus::PendingUpload,
            action: SyncAction::Upload,
            uploaded_id: None,
            error: None,
        };
        let json = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(json["status"], "pending_upload");
        assert_eq!(json["action"], "upload");
        assert!(json.get("error").is_none());
    }
}
