//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.glancesync/
//!   config.yaml   (mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(path: &Path, …)`: explicit path; used in tests with `TempDir`
//! - `fn(…)`: derives the path from `dirs::home_dir()`, delegates to `_at`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::policy::Policy;
use crate::types::{RegionName, TargetName, MASTER_TARGET};

fn default_max_children() -> usize {
    1
}

/// Root of the GlanceSync YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Region holding the authoritative image catalog.
    pub master_region: RegionName,
    /// Upper bound of region jobs running at once in parallel mode.
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    /// One policy per target; `master` is required.
    pub targets: BTreeMap<TargetName, Policy>,
}

impl SyncConfig {
    /// A config with a single `master` target.
    pub fn new(master_region: impl Into<RegionName>, master_policy: Policy) -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(TargetName::master(), master_policy);
        Self {
            master_region: master_region.into(),
            max_children: default_max_children(),
            targets,
        }
    }

    /// Policy of the target `region` belongs to.
    pub fn policy_for(&self, region: &RegionName) -> Result<&Policy, ConfigError> {
        let target = region.target();
        self.targets
            .get(&target)
            .ok_or_else(|| ConfigError::UnknownTarget {
                region: region.clone(),
                target,
            })
    }

    /// Policy of the `master` target.
    pub fn master_policy(&self) -> Result<&Policy, ConfigError> {
        self.targets
            .get(&TargetName::master())
            .ok_or_else(|| ConfigError::Invalid(format!("missing '{MASTER_TARGET}' target")))
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.master_policy()?;
        if !self.master_region.target().is_master() {
            return Err(ConfigError::Invalid(format!(
                "master region '{}' must not be target-qualified",
                self.master_region
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.glancesync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".glancesync").join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate the config at `path`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<SyncConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    let config: SyncConfig = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper over the default location.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&config_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `path`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(path: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
