//! Get/put/check orchestration
//!
//! Lookups consult the negative cache first, wait out any local write that
//! is still in flight, and then go to the reader. Stores go straight to the
//! writer. Every request resolves exactly once: either through the callback
//! it was given or through the returned error, never both.

use crate::error::{Result, StorageError};
use crate::negative::NegativeResultCache;
use crate::remote::{AssetReader, AssetWriter, WriteError};
use crate::types::{Asset, CacheRule, PutResult};
use partition_cache::{AssetId, PartitionedTemporalGuidCache};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How long a lookup waits for an in-flight local write to land by default
pub const DEFAULT_DURABILITY_TIMEOUT: Duration = Duration::from_secs(30);
const DURABILITY_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct StorageManager {
    cache: Arc<PartitionedTemporalGuidCache>,
    negative_cache: Arc<NegativeResultCache>,
    reader: Arc<dyn AssetReader>,
    writer: Arc<dyn AssetWriter>,
    durability_timeout: Duration,
}

impl StorageManager {
    pub fn new(
        cache: Arc<PartitionedTemporalGuidCache>,
        negative_cache: Arc<NegativeResultCache>,
        reader: Arc<dyn AssetReader>,
        writer: Arc<dyn AssetWriter>,
    ) -> Self {
        Self {
            cache,
            negative_cache,
            reader,
            writer,
            durability_timeout: DEFAULT_DURABILITY_TIMEOUT,
        }
    }

    pub fn with_durability_timeout(mut self, timeout: Duration) -> Self {
        self.durability_timeout = timeout;
        self
    }

    /// Retrieve an asset.
    ///
    /// Calls `on_success` with the asset or `on_failure` if it could not be
    /// found. With `cache_result` false the reader is told not to populate
    /// the local cache. Errors (nil id, durability timeout) are returned
    /// without calling either callback.
    pub async fn get_asset<S, F>(
        &self,
        id: AssetId,
        on_success: S,
        on_failure: F,
        cache_result: bool,
    ) -> Result<()>
    where
        S: FnOnce(Asset),
        F: FnOnce(),
    {
        let rule = if cache_result {
            CacheRule::Normal
        } else {
            CacheRule::SkipWrite
        };

        match self.resolve(id, rule).await? {
            Some(asset) => on_success(asset),
            None => on_failure(),
        }
        Ok(())
    }

    /// Report whether an asset can be found, with the same lookup rules as
    /// [`get_asset`](Self::get_asset).
    pub async fn check_asset<F>(&self, id: AssetId, on_found: F) -> Result<()>
    where
        F: FnOnce(bool),
    {
        let found = self.resolve(id, CacheRule::Normal).await?.is_some();
        on_found(found);
        Ok(())
    }

    /// Hand an asset to the writer and report the outcome through `on_result`
    pub async fn store_asset<F>(&self, asset: Asset, on_result: F) -> Result<()>
    where
        F: FnOnce(PutResult),
    {
        if asset.id.is_nil() {
            return Err(StorageError::InvalidAssetId);
        }

        let result = match self.writer.put_asset(&asset).await {
            Ok(()) => PutResult::Done,
            Err(WriteError::AlreadyExists(_)) => PutResult::Duplicate,
            Err(e) => {
                error!(id = %asset.id, error = %e, "Error storing asset");
                PutResult::Failure
            }
        };

        if result != PutResult::Failure {
            // The id exists now, so an earlier miss is stale.
            self.negative_cache.invalidate(asset.id).await;
        }

        debug!(id = %asset.id, %result, "Store finished");
        on_result(result);
        Ok(())
    }

    /// Ids known to the local cache whose hex form starts with `prefix`
    pub fn get_locally_known_asset_ids(&self, prefix: &str) -> Vec<AssetId> {
        self.cache.items_with_prefix(prefix)
    }

    async fn resolve(&self, id: AssetId, rule: CacheRule) -> Result<Option<Asset>> {
        if id.is_nil() {
            return Err(StorageError::InvalidAssetId);
        }

        if self.negative_cache.contains(id).await {
            debug!(%id, "Negative cache hit");
            return Ok(None);
        }

        self.wait_until_on_disk(id).await?;

        if !self.reader.has_upstream() {
            return Ok(None);
        }

        match self.reader.get_asset(id, rule).await {
            Ok(Some(asset)) => Ok(Some(asset)),
            Ok(None) => {
                // A locally indexed id is not a confirmed miss.
                if !self.cache.is_indexed(id) {
                    self.negative_cache.insert(id).await;
                    // A store may have landed between the check and the insert.
                    if self.cache.is_indexed(id) {
                        self.negative_cache.invalidate(id).await;
                    }
                }
                Ok(None)
            }
            Err(e) => {
                warn!(%id, error = %e, "Reader failed, reporting asset as not found");
                Ok(None)
            }
        }
    }

    /// Covers a read that races a local write: the id is indexed but its
    /// bytes are not durable yet.
    async fn wait_until_on_disk(&self, id: AssetId) -> Result<()> {
        if !self.cache.contains(id) || self.cache.is_on_disk(id) {
            return Ok(());
        }

        let started = Instant::now();
        let deadline = started + self.durability_timeout;
        loop {
            if self.cache.is_on_disk(id) || !self.cache.is_indexed(id) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(%id, waited = ?started.elapsed(), "Gave up waiting for asset to reach disk");
                return Err(StorageError::DurabilityTimeout {
                    id,
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(DURABILITY_POLL_INTERVAL).await;
        }
    }
}
