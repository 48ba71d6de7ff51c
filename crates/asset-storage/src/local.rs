//! Disk-budgeted asset store over the partition cache
//!
//! Used as the authoritative store of a standalone node: assets are written
//! into the current partition as one file each, read back through the
//! cache index, and old partitions are retired whenever the total size goes
//! over budget.

use crate::error::Result;
use crate::remote::{AssetReader, AssetWriter, ReadError, WriteError};
use crate::types::{Asset, CacheRule};
use async_trait::async_trait;
use partition_cache::{asset_file, AssetId, EvictionReport, PartitionedTemporalGuidCache};
use std::io;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

pub struct LocalAssetStore {
    cache: Arc<PartitionedTemporalGuidCache>,
    max_bytes: u64,
}

impl LocalAssetStore {
    pub fn new(cache: Arc<PartitionedTemporalGuidCache>, max_bytes: u64) -> Self {
        Self { cache, max_bytes }
    }

    pub fn cache(&self) -> &Arc<PartitionedTemporalGuidCache> {
        &self.cache
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Read an asset's bytes; `None` if it is not (yet) on disk
    pub async fn read(&self, id: AssetId) -> Result<Option<Asset>> {
        let partition = match self.cache.locate(id) {
            Some(partition) => partition,
            None => return Ok(None),
        };
        if !self.cache.is_on_disk(id) {
            return Ok(None);
        }

        match fs::read(asset_file(&partition, id)).await {
            Ok(data) => Ok(Some(Asset { id, data })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(%id, partition = ?partition, "Indexed asset missing from disk, dropping record");
                self.cache.try_remove(id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write an asset into the current partition.
    ///
    /// Returns `false` without touching disk if the id is already stored.
    pub async fn write(&self, asset: &Asset) -> Result<bool> {
        let partition = match self.cache.try_add_pending(asset.id, asset.size())? {
            Some(partition) => partition,
            None => return Ok(false),
        };

        if let Err(e) = fs::write(asset_file(&partition, asset.id), &asset.data).await {
            self.cache.try_remove(asset.id);
            return Err(e.into());
        }
        self.cache.mark_on_disk(asset.id);
        debug!(id = %asset.id, size = asset.size(), "Stored asset");

        // The asset is durable from here on; budgeting is retried by maintenance.
        if let Err(e) = self.enforce_budget().await {
            error!(id = %asset.id, error = %e, "Budget enforcement failed after write");
        }
        Ok(true)
    }

    /// Remove one asset from the index and from disk
    pub async fn purge(&self, id: AssetId) -> Result<bool> {
        let partition = match self.cache.locate(id) {
            Some(partition) => partition,
            None => return Ok(false),
        };
        if !self.cache.try_remove(id) {
            return Ok(false);
        }

        match fs::remove_file(asset_file(&partition, id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(%id, "Purged asset");
        Ok(true)
    }

    /// Drop every locally stored asset
    pub async fn purge_all(&self) -> Result<()> {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || cache.clear())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        info!("Purged all local assets");
        Ok(())
    }

    /// Evict until the store fits its budget again
    pub async fn enforce_budget(&self) -> Result<EvictionReport> {
        let cache = Arc::clone(&self.cache);
        let max_bytes = self.max_bytes;
        let report = tokio::task::spawn_blocking(move || {
            let total = cache.total_bytes();
            if total <= max_bytes {
                return Ok(EvictionReport::default());
            }
            cache.remove(total - max_bytes)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        if report.bytes_cleared > 0 {
            info!(
                evicted = report.evicted.len(),
                bytes_cleared = report.bytes_cleared,
                max_bytes = self.max_bytes,
                "Evicted assets to stay within budget"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl AssetReader for LocalAssetStore {
    fn has_upstream(&self) -> bool {
        true
    }

    async fn get_asset(
        &self,
        id: AssetId,
        _rule: CacheRule,
    ) -> std::result::Result<Option<Asset>, ReadError> {
        self.read(id)
            .await
            .map_err(|e| ReadError::Backend(e.to_string()))
    }
}

#[async_trait]
impl AssetWriter for LocalAssetStore {
    async fn put_asset(&self, asset: &Asset) -> std::result::Result<(), WriteError> {
        match self.write(asset).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(WriteError::AlreadyExists(asset.id)),
            Err(e) => Err(WriteError::Backend(e.to_string())),
        }
    }
}
