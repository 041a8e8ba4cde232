//! Error types for glancesync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{RegionName, TargetName};

/// All errors that can arise from configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// A region belongs to a target with no policy.
    #[error("region '{region}' belongs to unknown target '{target}'")]
    UnknownTarget {
        region: RegionName,
        target: TargetName,
    },

    /// The configuration is structurally valid YAML but semantically unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}
