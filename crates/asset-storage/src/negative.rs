//! Short-lived record of assets confirmed missing
//!
//! Not persisted; losing it on restart only costs a few extra upstream
//! lookups.

use moka::future::Cache;
use partition_cache::AssetId;
use std::time::Duration;
use tracing::debug;

/// Default lifetime of a negative entry (2 minutes)
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(2 * 60);
const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Sliding-TTL set of asset ids the backing store reported as absent.
///
/// A zero TTL disables it: nothing is stored and every lookup misses.
pub struct NegativeResultCache {
    entries: Option<Cache<AssetId, ()>>,
}

impl NegativeResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(ttl: Duration, max_entries: u64) -> Self {
        let entries = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(max_entries)
                .time_to_idle(ttl)
                .build()
        });
        Self { entries }
    }

    /// A cache that never remembers anything
    pub fn disabled() -> Self {
        Self { entries: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Whether `id` is a recent known miss. A hit extends the entry's life.
    pub async fn contains(&self, id: AssetId) -> bool {
        match &self.entries {
            Some(entries) => entries.get(&id).await.is_some(),
            None => false,
        }
    }

    pub async fn insert(&self, id: AssetId) {
        if let Some(entries) = &self.entries {
            entries.insert(id, ()).await;
            debug!(%id, "Negative cache entry added");
        }
    }

    pub async fn invalidate(&self, id: AssetId) {
        if let Some(entries) = &self.entries {
            entries.invalidate(&id).await;
        }
    }

    /// Approximate number of live entries
    pub async fn entry_count(&self) -> u64 {
        match &self.entries {
            Some(entries) => {
                entries.run_pending_tasks().await;
                entries.entry_count()
            }
            None => 0,
        }
    }
}

impl Default for NegativeResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_NEGATIVE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_contains() {
        let cache = NegativeResultCache::default();
        let id = AssetId::new_random();

        assert!(!cache.contains(id).await);
        cache.insert(id).await;
        assert!(cache.contains(id).await);
        assert!(!cache.contains(AssetId::new_random()).await);
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = NegativeResultCache::default();
        let id = AssetId::new_random();
        cache.insert(id).await;

        cache.invalidate(id).await;
        assert!(!cache.contains(id).await);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_inert() {
        let cache = NegativeResultCache::new(Duration::ZERO);
        let id = AssetId::new_random();
        assert!(!cache.is_enabled());

        cache.insert(id).await;
        assert!(!cache.contains(id).await);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = NegativeResultCache::new(Duration::from_millis(100));
        let id = AssetId::new_random();
        cache.insert(id).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!cache.contains(id).await);
    }
}
