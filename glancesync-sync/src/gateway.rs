//! Region store gateway: the capability surface the synchronizer consumes.
//!
//! One implementation serves every region of a deployment; each call names
//! the region it targets. Implementations must be safe to share across the
//! orchestrator's worker threads.

use std::path::{Path, PathBuf};

use thiserror::Error;

use glancesync_core::types::{Image, ImageId, RegionName, TargetName};

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("region '{0}' not found")]
    RegionNotFound(RegionName),

    #[error("image '{id}' not found in region '{region}'")]
    ImageNotFound { region: RegionName, id: ImageId },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Operations against remote image stores.
pub trait ImageStore: Send + Sync {
    /// Every image currently held by `region`, whatever its status.
    fn list_images(&self, region: &RegionName) -> Result<Vec<Image>, StoreError>;

    /// Raw bytes of an image, used as the source of uploads.
    fn download(&self, region: &RegionName, id: &ImageId) -> Result<Vec<u8>, StoreError>;

    /// Create a new image in `region` and return its store-assigned id.
    fn upload(
        &self,
        region: &RegionName,
        image: &Image,
        content: &[u8],
    ) -> Result<ImageId, StoreError>;

    /// Overwrite name, visibility and properties of the image `image.id`.
    fn update_metadata(&self, region: &RegionName, image: &Image) -> Result<(), StoreError>;

    fn delete(&self, region: &RegionName, id: &ImageId) -> Result<(), StoreError>;

    /// Full names of every region belonging to `target`.
    fn list_target_regions(&self, target: &TargetName) -> Result<Vec<RegionName>, StoreError>;

    /// Dump the metadata of every image of `region` under `destination`.
    fn export_metadata(&self, region: &RegionName, destination: &Path) -> Result<(), StoreError>;
}
