pub mod backup;
pub mod regions;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use glancesync_core::{config, SyncConfig};
use glancesync_runner::Orchestrator;
use glancesync_sync::MemoryStore;

/// Loaded configuration plus the store it runs against.
pub struct Session {
    pub config: SyncConfig,
    pub store: Arc<MemoryStore>,
}

impl Session {
    pub fn open(config_path: Option<&Path>, store_dir: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => config::load_at(path)
                .with_context(|| format!("failed to load config '{}'", path.display()))?,
            None => config::load().context("failed to load ~/.glancesync/config.yaml")?,
        };

        let store_dir = match store_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_store_dir()?,
        };
        let store = MemoryStore::open_at(&store_dir)
            .with_context(|| format!("failed to open image store '{}'", store_dir.display()))?;

        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    pub fn orchestrator<S: AsRef<str>>(self, tokens: &[S]) -> Result<Orchestrator> {
        Orchestrator::new(self.store, self.config, tokens).context("failed to plan regions")
    }
}

fn default_store_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".glancesync").join("store"))
}
