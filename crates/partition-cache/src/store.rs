//! Partition storage backends
//!
//! The cache never touches asset bytes itself. Everything it needs from the
//! storage engine goes through [`PartitionStore`], so any engine that can
//! create, delete, copy between and enumerate partitions can sit behind it.

use crate::types::AssetId;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lifecycle operations the cache performs on partition storage
pub trait PartitionStore: Send + Sync {
    /// Prepare a partition for writes, creating it if needed
    fn open_or_create(&self, path: &Path) -> io::Result<()>;

    /// Fully remove a retired partition
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Copy one asset's bytes from a retiring partition into another
    fn copy_asset(&self, id: AssetId, source: &Path, dest: &Path) -> io::Result<()>;

    /// Drop one evicted asset's bytes from a partition that stays open
    fn delete_asset(&self, id: AssetId, partition: &Path) -> io::Result<()>;

    /// Enumerate a partition found on startup.
    ///
    /// Returns `None` if the path does not hold a partition this store owns.
    fn load_existing(&self, path: &Path) -> io::Result<Option<HashMap<AssetId, u64>>>;
}

/// Path of an asset's file inside a directory partition
pub fn asset_file(partition: &Path, id: AssetId) -> PathBuf {
    partition.join(id.to_string())
}

/// One directory per partition, one file per asset named by its hex id
#[derive(Debug, Clone, Default)]
pub struct DirectoryPartitionStore;

impl DirectoryPartitionStore {
    pub fn new() -> Self {
        Self
    }
}

impl PartitionStore for DirectoryPartitionStore {
    fn open_or_create(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)?;
        debug!(path = ?path, "Opened partition directory");
        Ok(())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            // Already gone is as good as deleted
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn copy_asset(&self, id: AssetId, source: &Path, dest: &Path) -> io::Result<()> {
        fs::copy(asset_file(source, id), asset_file(dest, id))?;
        Ok(())
    }

    fn delete_asset(&self, id: AssetId, partition: &Path) -> io::Result<()> {
        match fs::remove_file(asset_file(partition, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn load_existing(&self, path: &Path) -> io::Result<Option<HashMap<AssetId, u64>>> {
        if !path.is_dir() {
            return Ok(None);
        }

        let mut assets = HashMap::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let id = match name.to_str().and_then(|s| s.parse::<AssetId>().ok()) {
                Some(id) => id,
                None => {
                    warn!(path = ?entry.path(), "Skipping unrecognised file in partition");
                    continue;
                }
            };
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                assets.insert(id, metadata.len());
            }
        }

        Ok(Some(assets))
    }
}
