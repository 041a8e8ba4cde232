//! # glancesync-sync
//!
//! Reconciliation engine and per-region synchronizer.
//!
//! [`reconcile`] classifies every master image against one region without
//! touching a store. [`sync_region`] runs it against an [`ImageStore`] and
//! issues the uploads, metadata updates, replacements and retirements needed
//! to converge the region.

pub mod error;
pub mod gateway;
pub mod memory_store;
pub mod reconciler;
pub mod region;

pub use error::SyncError;
pub use gateway::{ImageStore, StoreError};
pub use memory_store::{MemoryStore, RegionSnapshot};
pub use reconciler::{
    classify, eligible, reconcile, resolve_local, retirement_updates, ReconcileWarning,
    Reconciliation, SyncEntry,
};
pub use region::{
    region_status, sync_region, ImageOutcome, RegionSyncReport, RetirementOutcome, SyncAction,
};
