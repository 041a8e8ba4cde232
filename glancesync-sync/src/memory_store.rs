//! In-memory [`ImageStore`] with optional directory persistence.
//!
//! # Storage layout
//!
//! ```text
//! <dir>/
//!   regions/<region>.json   (one RegionSnapshot per region)
//!   blobs/<checksum>        (image bytes, shared by every region)
//! ```
//!
//! Writes use the atomic `.tmp` + rename pattern. Backups produced by
//! [`ImageStore::export_metadata`] are `backup_<region>.json` files holding the
//! same [`RegionSnapshot`] payload and can be loaded back with
//! [`MemoryStore::import_backup_dir`].

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use glancesync_core::types::{Image, ImageId, RegionName, TargetName, ACTIVE_STATUS};

use crate::gateway::{store_io_err, ImageStore, StoreError};

/// On-disk payload for one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub region: RegionName,
    pub exported_at: DateTime<Utc>,
    pub images: Vec<Image>,
}

#[derive(Debug, Default)]
struct StoreState {
    regions: BTreeMap<RegionName, BTreeMap<ImageId, Image>>,
    blobs: BTreeMap<String, Vec<u8>>,
}

/// Thread-safe in-memory image store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    persist_dir: Option<PathBuf>,
    mutations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted under `dir`, loading whatever it already holds.
    pub fn open_at(dir: &Path) -> Result<Self, StoreError> {
        let mut state = StoreState::default();

        for snapshot in read_snapshots(&dir.join("regions"), "")? {
            state.regions.insert(
                snapshot.region.clone(),
                snapshot
                    .images
                    .into_iter()
                    .map(|img| (img.id.clone(), img))
                    .collect(),
            );
        }

        let blobs = dir.join("blobs");
        if blobs.exists() {
            for entry in std::fs::read_dir(&blobs).map_err(|e| store_io_err(&blobs, e))? {
                let entry = entry.map_err(|e| store_io_err(&blobs, e))?;
                let path = entry.path();
                if path.extension().is_some() {
                    continue;
                }
                let checksum = entry.file_name().to_string_lossy().into_owned();
                let bytes = std::fs::read(&path).map_err(|e| store_io_err(&path, e))?;
                state.blobs.insert(checksum, bytes);
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            persist_dir: Some(dir.to_path_buf()),
            mutations: AtomicUsize::new(0),
        })
    }

    /// Register a region with no images.
    pub fn add_region(&self, region: impl Into<RegionName>) -> Result<(), StoreError> {
        let region = region.into();
        let mut state = self.write()?;
        state.regions.entry(region.clone()).or_default();
        self.persist(&state, &region, None)
    }

    /// Seed an image as-is (id and owner included), with its content.
    pub fn add_image(&self, image: Image, content: &[u8]) -> Result<(), StoreError> {
        let region = image.region.clone();
        let mut state = self.write()?;
        state
            .blobs
            .entry(image.checksum.clone())
            .or_insert_with(|| content.to_vec());
        state
            .regions
            .entry(region.clone())
            .or_default()
            .insert(image.id.clone(), image.clone());
        self.persist(&state, &region, Some(&image.checksum))
    }

    /// Load every `backup_<region>.json` file found in `dir`.
    pub fn import_backup_dir(&self, dir: &Path) -> Result<usize, StoreError> {
        let snapshots = read_snapshots(dir, "backup_")?;
        let count = snapshots.len();
        let mut state = self.write()?;
        for snapshot in snapshots {
            let images = state.regions.entry(snapshot.region.clone()).or_default();
            for image in snapshot.images {
                images.insert(image.id.clone(), image);
            }
            self.persist(&state, &snapshot.region, None)?;
        }
        Ok(count)
    }

    /// Number of upload / update / delete calls served so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Current copy of one image, for inspection.
    pub fn get(&self, region: &RegionName, id: &ImageId) -> Option<Image> {
        self.read()
            .ok()?
            .regions
            .get(region)
            .and_then(|images| images.get(id))
            .cloned()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }

    /// Write `region` (and the blob of `checksum`, if given) to disk.
    ///
    /// Callers hold the write lock, so writers never interleave.
    fn persist(
        &self,
        state: &StoreState,
        region: &RegionName,
        checksum: Option<&str>,
    ) -> Result<(), StoreError> {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };
        if let Some(checksum) = checksum {
            let path = dir.join("blobs").join(checksum);
            if !path.exists() {
                let bytes = state
                    .blobs
                    .get(checksum)
                    .ok_or_else(|| missing_blob(checksum))?;
                write_atomic(&path, bytes)?;
            }
        }
        let snapshot = snapshot_of(state, region)?;
        let path = dir.join("regions").join(format!("{region}.json"));
        write_atomic(&path, serde_json::to_string_pretty(&snapshot)?.as_bytes())
    }
}

fn snapshot_of(state: &StoreState, region: &RegionName) -> Result<RegionSnapshot, StoreError> {
    let images = state
        .regions
        .get(region)
        .ok_or_else(|| StoreError::RegionNotFound(region.clone()))?;
    Ok(RegionSnapshot {
        region: region.clone(),
        exported_at: Utc::now(),
        images: images.values().cloned().collect(),
    })
}

fn missing_blob(checksum: &str) -> StoreError {
    StoreError::Backend(format!("no content stored for checksum {checksum}"))
}

impl ImageStore for MemoryStore {
    fn list_images(&self, region: &RegionName) -> Result<Vec<Image>, StoreError> {
        let state = self.read()?;
        state
            .regions
            .get(region)
            .map(|images| images.values().cloned().collect())
            .ok_or_else(|| StoreError::RegionNotFound(region.clone()))
    }

    fn download(&self, region: &RegionName, id: &ImageId) -> Result<Vec<u8>, StoreError> {
        let state = self.read()?;
        let image = state
            .regions
            .get(region)
            .ok_or_else(|| StoreError::RegionNotFound(region.clone()))?
            .get(id)
            .ok_or_else(|| StoreError::ImageNotFound {
                region: region.clone(),
                id: id.clone(),
            })?;
        state
            .blobs
            .get(&image.checksum)
            .cloned()
            .ok_or_else(|| missing_blob(&image.checksum))
    }

    fn upload(
        &self,
        region: &RegionName,
        image: &Image,
        content: &[u8],
    ) -> Result<ImageId, StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write()?;
        let new_blob = !state.blobs.contains_key(&image.checksum);
        if new_blob {
            state.blobs.insert(image.checksum.clone(), content.to_vec());
        }
        let images = state.regions.entry(region.clone()).or_default();
        let mut count = 1;
        let mut id = ImageId(format!("{count}${}", image.name));
        while images.contains_key(&id) {
            count += 1;
            id = ImageId(format!("{count}${}", image.name));
        }
        let stored = Image {
            id: id.clone(),
            region: region.clone(),
            status: ACTIVE_STATUS.to_string(),
            ..image.clone()
        };
        images.insert(id.clone(), stored);

        if let Err(err) = self.persist(&state, region, Some(&image.checksum)) {
            if let Some(images) = state.regions.get_mut(region) {
                images.remove(&id);
            }
            if new_blob {
                state.blobs.remove(&image.checksum);
            }
            return Err(err);
        }
        Ok(id)
    }

    fn update_metadata(&self, region: &RegionName, image: &Image) -> Result<(), StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write()?;
        let stored = state
            .regions
            .get_mut(region)
            .ok_or_else(|| StoreError::RegionNotFound(region.clone()))?
            .get_mut(&image.id)
            .ok_or_else(|| StoreError::ImageNotFound {
                region: region.clone(),
                id: image.id.clone(),
            })?;
        let previous = stored.clone();
        stored.name = image.name.clone();
        stored.visibility = image.visibility;
        stored.properties = image.properties.clone();

        if let Err(err) = self.persist(&state, region, None) {
            if let Some(images) = state.regions.get_mut(region) {
                images.insert(previous.id.clone(), previous);
            }
            return Err(err);
        }
        Ok(())
    }

    fn delete(&self, region: &RegionName, id: &ImageId) -> Result<(), StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write()?;
        let removed = state
            .regions
            .get_mut(region)
            .ok_or_else(|| StoreError::RegionNotFound(region.clone()))?
            .remove(id)
            .ok_or_else(|| StoreError::ImageNotFound {
                region: region.clone(),
                id: id.clone(),
            })?;

        if let Err(err) = self.persist(&state, region, None) {
            if let Some(images) = state.regions.get_mut(region) {
                images.insert(removed.id.clone(), removed);
            }
            return Err(err);
        }
        Ok(())
    }

    fn list_target_regions(&self, target: &TargetName) -> Result<Vec<RegionName>, StoreError> {
        let state = self.read()?;
        Ok(state
            .regions
            .keys()
            .filter(|region| &region.target() == target)
            .cloned()
            .collect())
    }

    fn export_metadata(&self, region: &RegionName, destination: &Path) -> Result<(), StoreError> {
        let snapshot = snapshot_of(&*self.read()?, region)?;
        let path = destination.join(format!("backup_{region}.json"));
        write_atomic(&path, serde_json::to_string_pretty(&snapshot)?.as_bytes())
    }
}

fn read_snapshots(dir: &Path, prefix: &str) -> Result<Vec<RegionSnapshot>, StoreError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| store_io_err(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            name.starts_with(prefix) && name.ends_with(".json")
        })
        .collect();
    entries.sort();

    let mut snapshots = Vec::with_capacity(entries.len());
    for path in entries {
        let contents = std::fs::read_to_string(&path).map_err(|e| store_io_err(&path, e))?;
        snapshots.push(serde_json::from_str(&contents)?);
    }
    Ok(snapshots)
}

/// Write through a uniquely named `.tmp` sibling, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| store_io_err(parent, e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".write-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| store_io_err(parent, e))?;
    tmp.write_all(bytes).map_err(|e| store_io_err(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| store_io_err(path, e.error))?;
    Ok(())
}
