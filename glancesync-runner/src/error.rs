use std::path::PathBuf;

use thiserror::Error;

use glancesync_core::types::RegionName;

/// Error surface for region planning, backups and job execution.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] glancesync_sync::StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] glancesync_sync::SyncError),

    #[error("config error: {0}")]
    Config(#[from] glancesync_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job for region '{region}' did not complete: {message}")]
    Join { region: RegionName, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RunnerError {
    RunnerError::Io {
        path: path.into(),
        source,
    }
}
