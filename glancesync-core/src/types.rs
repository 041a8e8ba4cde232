//! Domain types for GlanceSync.
//!
//! Images are plain values: every reconciliation step reads them by reference
//! and produces new copies, never mutating its inputs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Property key naming the kernel image an AMI boots with.
pub const KERNEL_ID: &str = "kernel_id";
/// Property key naming the ramdisk image an AMI boots with.
pub const RAMDISK_ID: &str = "ramdisk_id";
/// Property keys that form a dependency edge to another image.
pub const DEPENDENCY_KEYS: [&str; 2] = [KERNEL_ID, RAMDISK_ID];
/// Name suffix marking a retired master image.
pub const OBSOLETE_SUFFIX: &str = "_obsolete";
/// Store status of a usable image.
pub const ACTIVE_STATUS: &str = "active";
/// Wildcard accepted in the checksum policy sets.
pub const ANY_CHECKSUM: &str = "any";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Store-assigned image identifier, only unique inside one region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a target: a group of regions sharing one policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetName(pub String);

impl TargetName {
    /// The implicit target of every unqualified region name.
    pub fn master() -> Self {
        Self(MASTER_TARGET.to_owned())
    }

    pub fn is_master(&self) -> bool {
        self.0 == MASTER_TARGET
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TargetName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of the target owning unqualified regions.
pub const MASTER_TARGET: &str = "master";
/// Separator between target and base name in a full region name.
pub const TARGET_SEPARATOR: char = ':';

/// Full region identifier: `<target>:<base>` or a bare `<base>` of the
/// `master` target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionName(pub String);

impl RegionName {
    /// Target the region belongs to.
    pub fn target(&self) -> TargetName {
        match self.0.split_once(TARGET_SEPARATOR) {
            Some((target, _)) => TargetName::from(target),
            None => TargetName::master(),
        }
    }

    /// Region name without the target qualifier.
    pub fn base(&self) -> &str {
        match self.0.split_once(TARGET_SEPARATOR) {
            Some((_, base)) => base,
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RegionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RegionName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Image visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// Synchronization status assigned to every eligible master image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Ok,
    OkStalledChecksum,
    PendingUpload,
    PendingMetadata,
    PendingReplace,
    PendingRename,
    PendingAmi,
    ErrorChecksum,
    ErrorAmi,
}

impl SyncStatus {
    /// `ok` or an accepted checksum divergence: nothing left to do.
    pub fn is_converged(self) -> bool {
        matches!(self, SyncStatus::Ok | SyncStatus::OkStalledChecksum)
    }

    /// Terminal states that need a human and are never acted upon.
    pub fn is_error(self) -> bool {
        matches!(self, SyncStatus::ErrorChecksum | SyncStatus::ErrorAmi)
    }

    /// Retryable work item for the region synchronizer.
    pub fn is_pending(self) -> bool {
        !self.is_converged() && !self.is_error()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Ok => "ok",
            SyncStatus::OkStalledChecksum => "ok_stalled_checksum",
            SyncStatus::PendingUpload => "pending_upload",
            SyncStatus::PendingMetadata => "pending_metadata",
            SyncStatus::PendingReplace => "pending_replace",
            SyncStatus::PendingRename => "pending_rename",
            SyncStatus::PendingAmi => "pending_ami",
            SyncStatus::ErrorChecksum => "error_checksum",
            SyncStatus::ErrorAmi => "error_ami",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One image instance in one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub name: String,
    pub region: RegionName,
    pub owner: String,
    pub visibility: Visibility,
    pub checksum: String,
    pub size: u64,
    pub status: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Image {
    pub fn is_public(&self) -> bool {
        self.visibility.is_public()
    }

    pub fn is_active(&self) -> bool {
        self.status == ACTIVE_STATUS
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// `(key, referenced name or id)` for every dependency property present.
    pub fn dependencies(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        DEPENDENCY_KEYS
            .iter()
            .filter_map(move |key| self.property(key).map(|value| (*key, value)))
    }

    /// Base name when this image carries the retirement suffix.
    pub fn obsoleted_name(&self) -> Option<&str> {
        self.name.strip_suffix(OBSOLETE_SUFFIX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
