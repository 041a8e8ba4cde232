//! Error types for glancesync-sync.

use thiserror::Error;

use glancesync_core::error::ConfigError;

use crate::gateway::StoreError;

/// Errors that abort a whole region pass.
///
/// Per-image store failures are not errors at this level: they are recorded
/// on the image's [`crate::ImageOutcome`] and the pass continues.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store call needed to plan the region failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The configuration has no usable policy for the region.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
