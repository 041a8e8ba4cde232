//! Per-target synchronization policy.
//!
//! A [`Policy`] decides which master images a region accepts and how checksum
//! conflicts with existing local copies are resolved.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Image, ImageId, RegionName, SyncStatus, ANY_CHECKSUM};

// ---------------------------------------------------------------------------
// Metadata condition
// ---------------------------------------------------------------------------

/// Closure form of a [`MetadataCondition`], for callers building policies in code.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Image) -> bool + Send + Sync>);

impl Predicate {
    pub fn new(f: impl Fn(&Image) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Boolean predicate over an image.
///
/// The declarative variants are what a YAML config can express:
///
/// ```yaml
/// metadata_condition:
///   all:
///     - property_equals: { key: sync, value: "true" }
///     - not: { has_property: domain }
///     - size_below: 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataCondition {
    Public,
    HasProperty(String),
    PropertyEquals { key: String, value: String },
    SizeBelow(u64),
    All(Vec<MetadataCondition>),
    Any(Vec<MetadataCondition>),
    Not(Box<MetadataCondition>),
    #[serde(skip)]
    Predicate(Predicate),
}

impl MetadataCondition {
    pub fn predicate(f: impl Fn(&Image) -> bool + Send + Sync + 'static) -> Self {
        MetadataCondition::Predicate(Predicate::new(f))
    }

    pub fn evaluate(&self, image: &Image) -> bool {
        match self {
            MetadataCondition::Public => image.is_public(),
            MetadataCondition::HasProperty(key) => image.properties.contains_key(key),
            MetadataCondition::PropertyEquals { key, value } => {
                image.property(key) == Some(value.as_str())
            }
            MetadataCondition::SizeBelow(limit) => image.size < *limit,
            MetadataCondition::All(conditions) => conditions.iter().all(|c| c.evaluate(image)),
            MetadataCondition::Any(conditions) => conditions.iter().any(|c| c.evaluate(image)),
            MetadataCondition::Not(condition) => !condition.evaluate(image),
            MetadataCondition::Predicate(Predicate(f)) => f(image),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Synchronization policy of one target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Tenant owning synchronized images in this target's regions.
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_condition: Option<MetadataCondition>,
    #[serde(default)]
    pub metadata_set: BTreeSet<String>,
    #[serde(default)]
    pub force_sync_ids: BTreeSet<ImageId>,
    #[serde(default)]
    pub only_tenant_images: bool,
    #[serde(default)]
    pub do_not_update_checksums: BTreeSet<String>,
    #[serde(default)]
    pub replace_checksums: BTreeSet<String>,
    #[serde(default)]
    pub rename_checksums: BTreeSet<String>,
    #[serde(default)]
    pub preferred_region_order: Vec<RegionName>,
}

impl Policy {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    /// Status for a local copy whose checksum differs from the master's.
    ///
    /// Exact checksum matches win over the `any` wildcard. Among exact
    /// matches: do-not-update, replace, rename. Among wildcards:
    /// do-not-update, rename, replace.
    pub fn checksum_conflict_status(&self, local_checksum: &str) -> SyncStatus {
        if self.do_not_update_checksums.contains(local_checksum) {
            SyncStatus::OkStalledChecksum
        } else if self.replace_checksums.contains(local_checksum) {
            SyncStatus::PendingReplace
        } else if self.rename_checksums.contains(local_checksum) {
            SyncStatus::PendingRename
        } else if self.do_not_update_checksums.contains(ANY_CHECKSUM) {
            SyncStatus::OkStalledChecksum
        } else if self.rename_checksums.contains(ANY_CHECKSUM) {
            SyncStatus::PendingRename
        } else if self.replace_checksums.contains(ANY_CHECKSUM) {
            SyncStatus::PendingReplace
        } else {
            SyncStatus::ErrorChecksum
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
