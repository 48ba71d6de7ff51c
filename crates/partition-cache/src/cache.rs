//! Partitioned temporal asset cache
//!
//! Every indexed asset lives in exactly one time partition. A partition is
//! current while its window contains "now" and only the current partition
//! receives new assets. Eviction walks the older partitions oldest first and
//! retires each one as a unit: assets accessed after the partition stopped
//! being current are copied forward into the current partition, the rest are
//! dropped, and the partition itself is deleted. Once no old partition is
//! left, eviction falls back to least recently used assets of the current
//! partition.

use crate::error::{CacheError, Result};
use crate::store::PartitionStore;
use crate::types::{AssetId, CacheStats, EvictionReport};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Shortest partition window the cache accepts
pub const MIN_PARTITION_INTERVAL: Duration = Duration::from_secs(1);

/// In-memory metadata for one cached asset.
///
/// Size, access time and durability are atomics so readers holding the
/// shared lock can update them; the partition key only changes under the
/// exclusive lock. `recency` is a logical clock reading that orders accesses
/// landing in the same millisecond.
struct CacheRecord {
    size: AtomicU64,
    partition: i64,
    last_access: AtomicI64,
    recency: AtomicU64,
    on_disk: AtomicBool,
}

impl CacheRecord {
    fn new(size: u64, partition: i64, accessed_at: i64, tick: u64, on_disk: bool) -> Self {
        Self {
            size: AtomicU64::new(size),
            partition,
            last_access: AtomicI64::new(accessed_at),
            recency: AtomicU64::new(tick),
            on_disk: AtomicBool::new(on_disk),
        }
    }

    fn touch(&self, now: i64, tick: u64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
        self.recency.fetch_max(tick, Ordering::Relaxed);
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }
}

struct Partition {
    path: PathBuf,
    members: HashSet<AssetId>,
}

#[derive(Default)]
struct Index {
    /// Ordered by id so prefix queries are range scans
    records: BTreeMap<AssetId, CacheRecord>,
    /// Ordered by window start so retirement walks oldest first
    partitions: BTreeMap<i64, Partition>,
}

/// Asset index whose storage is split into fixed-length time partitions
pub struct PartitionedTemporalGuidCache {
    root: PathBuf,
    interval_ms: i64,
    store: Box<dyn PartitionStore>,
    index: RwLock<Index>,
    /// Serializes `remove` and `clear`, which do storage work off the index lock
    eviction: Mutex<()>,
    clock: AtomicU64,
}

impl PartitionedTemporalGuidCache {
    /// Create the cache, rebuild the index from any partitions already under
    /// `root`, and open the current partition.
    pub fn new<S>(root: impl Into<PathBuf>, interval: Duration, store: S) -> Result<Self>
    where
        S: PartitionStore + 'static,
    {
        let root = root.into();
        if root.to_string_lossy().trim().is_empty() {
            return Err(CacheError::InvalidPath(
                "no storage path means no partitions".to_string(),
            ));
        }
        if interval < MIN_PARTITION_INTERVAL {
            return Err(CacheError::InvalidInterval(interval));
        }
        let interval_ms = i64::try_from(interval.as_millis())
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or(CacheError::InvalidInterval(interval))?;

        let cache = Self {
            root,
            interval_ms,
            store: Box::new(store),
            index: RwLock::new(Index::default()),
            eviction: Mutex::new(()),
            clock: AtomicU64::new(1),
        };

        {
            let mut index = cache.write_index();
            cache.rediscover(&mut index)?;

            let current = cache.partition_key(now_millis());
            match index.partitions.get(&current) {
                Some(partition) => {
                    let path = partition.path.clone();
                    cache
                        .store
                        .open_or_create(&path)
                        .map_err(|e| CacheError::partition("open", &path, e))?;
                }
                None => {
                    cache.ensure_partition(&mut index, current)?;
                }
            }

            info!(
                root = ?cache.root,
                interval_ms = cache.interval_ms,
                entries = index.records.len(),
                partitions = index.partitions.len(),
                "Partition cache ready"
            );
        }

        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }

    /// Index a new asset in the current partition.
    ///
    /// Returns the partition path the asset's bytes belong in, or `None` if
    /// the id is already indexed.
    pub fn try_add(&self, id: AssetId, size: u64) -> Result<Option<PathBuf>> {
        self.insert(id, size, true)
    }

    /// Like [`try_add`](Self::try_add), but the asset is not yet durable.
    /// Call [`mark_on_disk`](Self::mark_on_disk) once its bytes are written.
    pub fn try_add_pending(&self, id: AssetId, size: u64) -> Result<Option<PathBuf>> {
        self.insert(id, size, false)
    }

    fn insert(&self, id: AssetId, size: u64, on_disk: bool) -> Result<Option<PathBuf>> {
        let now = now_millis();
        let key = self.partition_key(now);

        let mut index = self.write_index();
        if index.records.contains_key(&id) {
            return Ok(None);
        }

        let path = self.ensure_partition(&mut index, key)?;
        let tick = self.tick();
        index
            .records
            .insert(id, CacheRecord::new(size, key, now, tick, on_disk));
        if let Some(partition) = index.partitions.get_mut(&key) {
            partition.members.insert(id);
        }

        debug!(%id, size, partition = key, on_disk, "Indexed asset");
        Ok(Some(path))
    }

    pub fn mark_on_disk(&self, id: AssetId) -> bool {
        let index = self.read_index();
        match index.records.get(&id) {
            Some(record) => {
                record.on_disk.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Whether the asset is indexed and its bytes are durable
    pub fn is_on_disk(&self, id: AssetId) -> bool {
        let index = self.read_index();
        index
            .records
            .get(&id)
            .map(|record| record.on_disk.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Membership check that does not count as an access
    pub fn is_indexed(&self, id: AssetId) -> bool {
        self.read_index().records.contains_key(&id)
    }

    /// Membership check; a hit counts as an access
    pub fn contains(&self, id: AssetId) -> bool {
        let now = now_millis();
        let index = self.read_index();
        match index.records.get(&id) {
            Some(record) => {
                record.touch(now, self.tick());
                true
            }
            None => false,
        }
    }

    /// Partition path currently holding the asset; a hit counts as an access
    pub fn locate(&self, id: AssetId) -> Option<PathBuf> {
        let now = now_millis();
        let index = self.read_index();
        let record = index.records.get(&id)?;
        record.touch(now, self.tick());
        index
            .partitions
            .get(&record.partition)
            .map(|partition| partition.path.clone())
    }

    /// Drop the record for `id`. Partition storage is left alone.
    pub fn try_remove(&self, id: AssetId) -> bool {
        let mut index = self.write_index();
        let record = match index.records.remove(&id) {
            Some(record) => record,
            None => return false,
        };
        if let Some(partition) = index.partitions.get_mut(&record.partition) {
            partition.members.remove(&id);
        }
        debug!(%id, "Removed asset from index");
        true
    }

    pub fn asset_size(&self, id: AssetId) -> Option<u64> {
        self.read_index().records.get(&id).map(CacheRecord::size)
    }

    /// Update the recorded size; ignored for unknown ids
    pub fn set_asset_size(&self, id: AssetId, size: u64) {
        if let Some(record) = self.read_index().records.get(&id) {
            record.size.store(size, Ordering::Relaxed);
        }
    }

    /// Ids whose hex form starts with `prefix`. Each match counts as an access.
    pub fn items_with_prefix(&self, prefix: &str) -> Vec<AssetId> {
        let range = match AssetId::prefix_range(prefix) {
            Some(range) => range,
            None => return Vec::new(),
        };

        let now = now_millis();
        let index = self.read_index();
        index
            .records
            .range(range)
            .map(|(id, record)| {
                record.touch(now, self.tick());
                *id
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.read_index().records.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.read_index().records.values().map(CacheRecord::size).sum()
    }

    pub fn partition_count(&self) -> usize {
        self.read_index().partitions.len()
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.read_index();
        CacheStats {
            entries: index.records.len(),
            partitions: index.partitions.len(),
            total_size: index.records.values().map(CacheRecord::size).sum(),
        }
    }

    /// Empty the index and drop the stored bytes of every durable asset.
    ///
    /// Old partitions are deleted outright. The current partition stays open
    /// so concurrent writers keep a place to land, and assets still being
    /// written into it are left indexed.
    pub fn clear(&self) -> Result<()> {
        let _eviction = self.eviction_guard();
        let current = self.partition_key(now_millis());

        let (retired, current_files) = {
            let mut index = self.write_index();
            let mut retired = std::mem::take(&mut index.partitions);
            let kept = retired.remove(&current);

            let mut current_files = Vec::new();
            let mut pending = Vec::new();
            if let Some(mut partition) = kept {
                for id in partition.members.drain() {
                    let durable = index
                        .records
                        .get(&id)
                        .map(|record| record.on_disk.load(Ordering::Acquire))
                        .unwrap_or(false);
                    if durable {
                        current_files.push((id, partition.path.clone()));
                    } else {
                        pending.push(id);
                    }
                }
                partition.members.extend(pending.iter().copied());
                index.partitions.insert(current, partition);
            }
            index.records.retain(|id, _| pending.contains(id));
            (retired, current_files)
        };

        for partition in retired.into_values() {
            self.store
                .delete(&partition.path)
                .map_err(|e| CacheError::partition("delete", &partition.path, e))?;
        }
        for (id, path) in current_files {
            self.store
                .delete_asset(id, &path)
                .map_err(|e| CacheError::partition("delete asset", &path, e))?;
        }

        info!(root = ?self.root, "Cleared partition cache");
        Ok(())
    }

    /// Evict at least `target_bytes`, or everything evictable if there is
    /// less than that.
    ///
    /// Old partitions are retired oldest first. If that does not free enough,
    /// durable assets in the current partition are evicted least recently
    /// used first.
    pub fn remove(&self, target_bytes: u64) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        if target_bytes == 0 {
            return Ok(report);
        }

        let _eviction = self.eviction_guard();
        let current = self.partition_key(now_millis());
        let candidates: Vec<i64> = self
            .read_index()
            .partitions
            .range(..current)
            .map(|(k, _)| *k)
            .collect();

        for key in candidates {
            if report.bytes_cleared >= target_bytes {
                break;
            }
            self.retire_partition(key, current, &mut report)?;
        }

        if report.bytes_cleared < target_bytes {
            self.evict_least_recent(current, target_bytes - report.bytes_cleared, &mut report)?;
        }

        debug!(
            target_bytes,
            bytes_cleared = report.bytes_cleared,
            evicted = report.evicted.len(),
            "Eviction pass finished"
        );
        Ok(report)
    }

    /// Retire one old partition. Storage calls run without the index lock;
    /// the index is only locked exclusively to apply the outcome.
    fn retire_partition(&self, key: i64, current: i64, report: &mut EvictionReport) -> Result<()> {
        // Anything read after this instant was wanted once the window closed.
        let cutoff = key.saturating_add(self.interval_ms);
        let (source, plan) = {
            let index = self.read_index();
            let partition = match index.partitions.get(&key) {
                Some(partition) => partition,
                None => return Ok(()),
            };
            let plan: Vec<(AssetId, bool)> = partition
                .members
                .iter()
                .filter_map(|id| {
                    let record = index.records.get(id)?;
                    Some((*id, record.last_access.load(Ordering::Relaxed) >= cutoff))
                })
                .collect();
            (partition.path.clone(), plan)
        };

        let mut migrants = Vec::new();
        let mut doomed = Vec::new();
        for (id, keep) in plan {
            if keep {
                migrants.push(id);
            } else {
                doomed.push(id);
            }
        }

        if !migrants.is_empty() {
            let dest = self.ensure_partition(&mut self.write_index(), current)?;
            for id in &migrants {
                self.store
                    .copy_asset(*id, &source, &dest)
                    .map_err(|e| CacheError::partition("copy", &source, e))?;
            }
        }

        let mut evicted = 0usize;
        {
            let mut index = self.write_index();
            for id in &migrants {
                let moved = match index.records.get_mut(id) {
                    Some(record) => {
                        record.partition = current;
                        true
                    }
                    None => false,
                };
                if moved {
                    if let Some(partition) = index.partitions.get_mut(&current) {
                        partition.members.insert(*id);
                    }
                }
            }
            for id in doomed {
                let owned = index
                    .records
                    .get(&id)
                    .map(|record| record.partition == key)
                    .unwrap_or(false);
                if !owned {
                    continue;
                }
                if let Some(record) = index.records.remove(&id) {
                    let size = record.size();
                    report.bytes_cleared += size;
                    report.evicted.insert(id, size);
                    evicted += 1;
                }
            }
            index.partitions.remove(&key);
        }

        self.store
            .delete(&source)
            .map_err(|e| CacheError::partition("delete", &source, e))?;

        info!(partition = key, migrated = migrants.len(), evicted, "Retired partition");
        Ok(())
    }

    /// Evict durable assets from the current partition, least recently used
    /// first, until `needed` bytes are freed or none are left.
    fn evict_least_recent(
        &self,
        current: i64,
        needed: u64,
        report: &mut EvictionReport,
    ) -> Result<()> {
        let (path, mut order) = {
            let index = self.read_index();
            let partition = match index.partitions.get(&current) {
                Some(partition) => partition,
                None => return Ok(()),
            };
            let order: Vec<(u64, AssetId)> = partition
                .members
                .iter()
                .filter_map(|id| {
                    let record = index.records.get(id)?;
                    if !record.on_disk.load(Ordering::Acquire) {
                        return None;
                    }
                    Some((record.recency.load(Ordering::Relaxed), *id))
                })
                .collect();
            (partition.path.clone(), order)
        };
        order.sort_unstable();

        let mut victims = Vec::new();
        {
            let mut index = self.write_index();
            let mut cleared = 0u64;
            for (_, id) in order {
                if cleared >= needed {
                    break;
                }
                let owned = index
                    .records
                    .get(&id)
                    .map(|record| record.partition == current)
                    .unwrap_or(false);
                if !owned {
                    continue;
                }
                if let Some(record) = index.records.remove(&id) {
                    let size = record.size();
                    cleared += size;
                    report.bytes_cleared += size;
                    report.evicted.insert(id, size);
                    victims.push(id);
                }
                if let Some(partition) = index.partitions.get_mut(&current) {
                    partition.members.remove(&id);
                }
            }
        }

        for id in &victims {
            self.store
                .delete_asset(*id, &path)
                .map_err(|e| CacheError::partition("delete asset", &path, e))?;
        }

        if !victims.is_empty() {
            info!(partition = current, evicted = victims.len(), "Evicted from current partition");
        }
        Ok(())
    }

    fn rediscover(&self, index: &mut Index) -> Result<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::partition("scan", &self.root, e)),
        };

        let mut found = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::partition("scan", &self.root, e))?;
            if let Some(key) = entry.file_name().to_str().and_then(|s| s.parse::<i64>().ok()) {
                found.insert(key, entry.path());
            }
        }

        // Ascending, so an id present in several partitions ends up in the newest.
        for (key, path) in found {
            let assets = match self
                .store
                .load_existing(&path)
                .map_err(|e| CacheError::partition("load", &path, e))?
            {
                Some(assets) => assets,
                None => {
                    debug!(path = ?path, "Ignoring directory that is not a partition");
                    continue;
                }
            };

            let mut members = HashSet::with_capacity(assets.len());
            for (id, size) in assets {
                let record = CacheRecord::new(size, key, key, 0, true);
                if let Some(previous) = index.records.insert(id, record) {
                    if let Some(older) = index.partitions.get_mut(&previous.partition) {
                        older.members.remove(&id);
                    }
                }
                members.insert(id);
            }

            info!(partition = key, assets = members.len(), "Rediscovered partition");
            index.partitions.insert(key, Partition { path, members });
        }

        Ok(())
    }

    fn ensure_partition(&self, index: &mut Index, key: i64) -> Result<PathBuf> {
        if let Some(partition) = index.partitions.get(&key) {
            return Ok(partition.path.clone());
        }

        let path = self.partition_path(key);
        self.store
            .open_or_create(&path)
            .map_err(|e| CacheError::partition("open", &path, e))?;
        info!(partition = key, path = ?path, "Opened partition");

        index.partitions.insert(
            key,
            Partition {
                path: path.clone(),
                members: HashSet::new(),
            },
        );
        Ok(path)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn partition_key(&self, now: i64) -> i64 {
        now.div_euclid(self.interval_ms) * self.interval_ms
    }

    fn partition_path(&self, key: i64) -> PathBuf {
        self.root.join(key.to_string())
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn eviction_guard(&self) -> MutexGuard<'_, ()> {
        self.eviction.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{asset_file, DirectoryPartitionStore};
    use std::collections::HashMap;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread::sleep;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MemoryState {
        partitions: HashMap<PathBuf, HashMap<AssetId, u64>>,
        opened: Vec<PathBuf>,
        deleted: Vec<PathBuf>,
        deleted_assets: Vec<AssetId>,
        copied: Vec<AssetId>,
        fail_copy: bool,
    }

    /// In-memory partition engine that records every call
    #[derive(Clone, Default)]
    struct MemoryStore {
        state: Arc<Mutex<MemoryState>>,
    }

    impl MemoryStore {
        fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
            self.state.lock().unwrap()
        }

        /// Lay down a partition as if a previous run had left it behind
        fn seed(&self, root: &Path, key: i64, assets: &[(AssetId, u64)]) {
            let path = root.join(key.to_string());
            fs::create_dir_all(&path).unwrap();
            self.state()
                .partitions
                .insert(path, assets.iter().copied().collect());
        }

        /// Simulate the asset bytes landing in their partition
        fn put(&self, path: &Path, id: AssetId, size: u64) {
            self.state()
                .partitions
                .get_mut(path)
                .unwrap()
                .insert(id, size);
        }
    }

    impl PartitionStore for MemoryStore {
        fn open_or_create(&self, path: &Path) -> io::Result<()> {
            let mut state = self.state();
            state.opened.push(path.to_path_buf());
            state.partitions.entry(path.to_path_buf()).or_default();
            Ok(())
        }

        fn delete(&self, path: &Path) -> io::Result<()> {
            let mut state = self.state();
            state.deleted.push(path.to_path_buf());
            state.partitions.remove(path);
            Ok(())
        }

        fn copy_asset(&self, id: AssetId, source: &Path, dest: &Path) -> io::Result<()> {
            let mut state = self.state();
            if state.fail_copy {
                return Err(io::Error::new(io::ErrorKind::Other, "disk on fire"));
            }
            let size = *state
                .partitions
                .get(source)
                .and_then(|assets| assets.get(&id))
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such asset"))?;
            state
                .partitions
                .get_mut(dest)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such partition"))?
                .insert(id, size);
            state.copied.push(id);
            Ok(())
        }

        fn delete_asset(&self, id: AssetId, partition: &Path) -> io::Result<()> {
            let mut state = self.state();
            state.deleted_assets.push(id);
            if let Some(assets) = state.partitions.get_mut(partition) {
                assets.remove(&id);
            }
            Ok(())
        }

        fn load_existing(&self, path: &Path) -> io::Result<Option<HashMap<AssetId, u64>>> {
            Ok(self.state().partitions.get(path).cloned())
        }
    }

    /// Sleep until just past the start of the next window so a short run of
    /// adds cannot straddle a boundary
    fn wait_for_window_start(interval: Duration) {
        let interval_ms = interval.as_millis() as i64;
        let into_window = now_millis().rem_euclid(interval_ms);
        sleep(Duration::from_millis((interval_ms - into_window + 20) as u64));
    }

    fn day() -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn id(s: &str) -> AssetId {
        s.parse().unwrap()
    }

    fn new_cache(root: &Path, interval: Duration) -> (PartitionedTemporalGuidCache, MemoryStore) {
        let store = MemoryStore::default();
        let cache = PartitionedTemporalGuidCache::new(root, interval, store.clone()).unwrap();
        (cache, store)
    }

    #[test]
    fn test_new_rejects_empty_path() {
        let result = PartitionedTemporalGuidCache::new("", day(), MemoryStore::default());
        assert!(matches!(result, Err(CacheError::InvalidPath(_))));

        let result = PartitionedTemporalGuidCache::new("   ", day(), MemoryStore::default());
        assert!(matches!(result, Err(CacheError::InvalidPath(_))));
    }

    #[test]
    fn test_new_rejects_short_intervals() {
        let dir = tempdir().unwrap();
        for interval in [Duration::ZERO, Duration::from_millis(990)] {
            let result =
                PartitionedTemporalGuidCache::new(dir.path(), interval, MemoryStore::default());
            assert!(matches!(result, Err(CacheError::InvalidInterval(_))));
        }
    }

    #[test]
    fn test_new_rejects_intervals_too_long_for_millisecond_keys() {
        let dir = tempdir().unwrap();
        for interval in [Duration::from_secs(1 << 61), Duration::MAX] {
            let result =
                PartitionedTemporalGuidCache::new(dir.path(), interval, MemoryStore::default());
            assert!(matches!(result, Err(CacheError::InvalidInterval(_))));
        }

        // The longest representable interval still works
        let longest = Duration::from_millis(i64::MAX as u64);
        let (cache, _) = new_cache(dir.path(), longest);
        assert_eq!(cache.interval(), longest);
        assert!(cache.try_add(AssetId::new_random(), 1).unwrap().is_some());
    }

    #[test]
    fn test_new_opens_current_partition() {
        let dir = tempdir().unwrap();
        let (cache, store) = new_cache(dir.path(), day());

        assert_eq!(store.state().opened.len(), 1);
        assert_eq!(cache.partition_count(), 1);
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_try_add_first_time_and_duplicate() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let asset = AssetId::new_random();

        let path = cache.try_add(asset, 1).unwrap();
        assert!(path.is_some());
        assert!(path.unwrap().starts_with(dir.path()));

        assert!(cache.try_add(asset, 2).unwrap().is_none());
        assert_eq!(cache.count(), 1);
        assert_eq!(cache.asset_size(asset), Some(1));
    }

    #[test]
    fn test_count_after_adding_three() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        for size in 1..=3 {
            cache.try_add(AssetId::new_random(), size).unwrap();
        }
        assert_eq!(cache.count(), 3);
        assert_eq!(cache.total_bytes(), 6);
    }

    #[test]
    fn test_clear_empties_index_and_current_partition() {
        let dir = tempdir().unwrap();
        let (cache, store) = new_cache(dir.path(), day());
        let asset = AssetId::new_random();
        let path = cache.try_add(asset, 5).unwrap().unwrap();
        store.put(&path, asset, 5);

        cache.clear().unwrap();

        assert_eq!(cache.count(), 0);
        assert!(!cache.contains(asset));
        assert_eq!(store.state().deleted_assets, vec![asset]);
        assert!(store.state().partitions[&path].is_empty());
        // The current partition stays open
        assert_eq!(cache.partition_count(), 1);
        assert!(store.state().deleted.is_empty());

        assert_eq!(cache.try_add(asset, 5).unwrap(), Some(path));
        assert_eq!(store.state().opened.len(), 1);
    }

    #[test]
    fn test_clear_deletes_old_partitions_and_keeps_pending_writes() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        let old = AssetId::new_random();
        store.seed(dir.path(), 1000, &[(old, 2)]);
        let cache = PartitionedTemporalGuidCache::new(dir.path(), day(), store.clone()).unwrap();
        let pending = AssetId::new_random();
        cache.try_add_pending(pending, 3).unwrap();

        cache.clear().unwrap();

        assert!(!cache.is_indexed(old));
        assert!(cache.is_indexed(pending));
        assert_eq!(cache.count(), 1);
        assert_eq!(store.state().deleted, vec![dir.path().join("1000")]);
        assert!(store.state().deleted_assets.is_empty());
    }

    #[test]
    fn test_contains() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let known = AssetId::new_random();
        cache.try_add(AssetId::new_random(), 1).unwrap();
        cache.try_add(known, 2).unwrap();

        assert!(cache.contains(known));
        assert!(!cache.contains(AssetId::new_random()));

        cache.try_remove(known);
        assert!(!cache.contains(known));
    }

    #[test]
    fn test_asset_size_get_and_set() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let first = AssetId::new_random();
        let second = AssetId::new_random();
        let unknown = AssetId::new_random();
        cache.try_add(first, 1).unwrap();
        cache.try_add(second, 3).unwrap();

        assert_eq!(cache.asset_size(second), Some(3));
        assert_eq!(cache.asset_size(unknown), None);

        cache.set_asset_size(second, 10);
        assert_eq!(cache.asset_size(second), Some(10));

        cache.set_asset_size(unknown, 10);
        assert_eq!(cache.asset_size(unknown), None);
        assert_eq!(cache.asset_size(first), Some(1));
        assert_eq!(cache.count(), 2);
    }

    #[test]
    fn test_items_with_prefix() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let fcf1 = id("fcf84364-5fbd-4866-b8a7-35b93a20dbc6");
        let fcf2 = id("fcfdbe4a-1f93-4316-8c32-ae7a168a00e4");
        cache.try_add(fcf1, 1).unwrap();
        cache.try_add(fcf2, 2).unwrap();
        cache.try_add(id("67bdbe4a-1f93-4316-8c32-ae7a168a00e4"), 3).unwrap();
        cache.try_add(id("06fd2e96-4c5e-4e87-918a-f217064330ea"), 4).unwrap();

        assert!(cache.items_with_prefix("123").is_empty());

        let mut found = cache.items_with_prefix("fcf");
        found.sort();
        assert_eq!(found, vec![fcf1, fcf2]);

        assert_eq!(cache.items_with_prefix("fcf8"), vec![fcf1]);
        assert_eq!(cache.items_with_prefix(&fcf2.to_string()), vec![fcf2]);
        assert!(cache.items_with_prefix("FCF").is_empty());
        assert!(cache.items_with_prefix("not-hex").is_empty());
        assert_eq!(cache.items_with_prefix("").len(), 4);
    }

    #[test]
    fn test_try_remove() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let known = AssetId::new_random();
        cache.try_add(AssetId::new_random(), 1).unwrap();
        cache.try_add(known, 2).unwrap();

        assert!(!cache.try_remove(AssetId::new_random()));
        assert_eq!(cache.count(), 2);

        assert!(cache.try_remove(known));
        assert!(!cache.try_remove(known));
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn test_pending_assets_become_durable() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let pending = AssetId::new_random();

        cache.try_add_pending(pending, 4).unwrap();
        assert!(cache.is_indexed(pending));
        assert!(!cache.is_on_disk(pending));

        assert!(cache.mark_on_disk(pending));
        assert!(cache.is_on_disk(pending));

        assert!(!cache.mark_on_disk(AssetId::new_random()));
        assert!(!cache.is_on_disk(AssetId::new_random()));
    }

    #[test]
    fn test_locate_returns_partition_path() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let asset = AssetId::new_random();
        let path = cache.try_add(asset, 1).unwrap().unwrap();

        assert_eq!(cache.locate(asset), Some(path));
        assert_eq!(cache.locate(AssetId::new_random()), None);
    }

    #[test]
    fn test_remove_empty_cache_does_nothing() {
        let dir = tempdir().unwrap();
        let (cache, store) = new_cache(dir.path(), day());

        let report = cache.remove(100).unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(report.bytes_cleared, 0);
        assert!(store.state().deleted.is_empty());
    }

    #[test]
    fn test_remove_zero_does_nothing() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        store.seed(dir.path(), 1000, &[(AssetId::new_random(), 2)]);
        let cache = PartitionedTemporalGuidCache::new(dir.path(), day(), store.clone()).unwrap();

        let report = cache.remove(0).unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(cache.count(), 1);
        assert!(store.state().deleted.is_empty());
    }

    #[test]
    fn test_remove_from_current_partition_reports_size_cleared() {
        let dir = tempdir().unwrap();
        let (cache, store) = new_cache(dir.path(), day());
        for size in [2, 4, 8] {
            let asset = AssetId::new_random();
            let path = cache.try_add(asset, size).unwrap().unwrap();
            store.put(&path, asset, size);
        }

        let report = cache.remove(5).unwrap();

        assert_eq!(report.bytes_cleared, 6);
        assert!(cache.count() < 3);
        assert_eq!(cache.total_bytes(), 8);
        // Current partition is trimmed, never deleted
        assert!(store.state().deleted.is_empty());
        assert_eq!(store.state().deleted_assets.len(), 2);
    }

    #[test]
    fn test_remove_from_current_partition_takes_least_recently_accessed() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let (stays1, stays2, gone1, gone2, stays3) = (
            AssetId::new_random(),
            AssetId::new_random(),
            AssetId::new_random(),
            AssetId::new_random(),
            AssetId::new_random(),
        );
        for asset in [stays1, stays2, gone1, gone2, stays3] {
            cache.try_add(asset, 2).unwrap();
        }

        cache.contains(stays1);
        cache.contains(stays3);
        cache.items_with_prefix(&stays2.to_string());

        let report = cache.remove(3).unwrap();

        let mut evicted: Vec<AssetId> = report.evicted.keys().copied().collect();
        evicted.sort();
        let mut expected = vec![gone1, gone2];
        expected.sort();
        assert_eq!(evicted, expected);
        assert!(!cache.contains(gone1));
        assert!(!cache.contains(gone2));
        assert!(cache.contains(stays1));
        assert!(cache.contains(stays2));
        assert!(cache.contains(stays3));
    }

    #[test]
    fn test_remove_skips_pending_assets_in_current_partition() {
        let dir = tempdir().unwrap();
        let (cache, _) = new_cache(dir.path(), day());
        let pending = AssetId::new_random();
        let durable = AssetId::new_random();
        cache.try_add_pending(pending, 4).unwrap();
        cache.try_add(durable, 4).unwrap();

        let report = cache.remove(100).unwrap();

        assert_eq!(report.evicted.keys().copied().collect::<Vec<_>>(), vec![durable]);
        assert!(cache.is_indexed(pending));
    }

    #[test]
    fn test_remove_walks_oldest_first_and_stops_at_target() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        let (a, b, c) = (
            AssetId::new_random(),
            AssetId::new_random(),
            AssetId::new_random(),
        );
        store.seed(dir.path(), 1000, &[(a, 2)]);
        store.seed(dir.path(), 2000, &[(b, 4)]);
        store.seed(dir.path(), 3000, &[(c, 8)]);
        let cache = PartitionedTemporalGuidCache::new(dir.path(), MIN_PARTITION_INTERVAL, store.clone())
            .unwrap();
        assert_eq!(cache.count(), 3);

        let report = cache.remove(5).unwrap();

        assert_eq!(report.bytes_cleared, 6);
        assert_eq!(report.evicted.len(), 2);
        assert_eq!(report.evicted.get(&a), Some(&2));
        assert_eq!(report.evicted.get(&b), Some(&4));
        assert!(cache.contains(c));
        assert_eq!(
            store.state().deleted,
            vec![dir.path().join("1000"), dir.path().join("2000")]
        );
    }

    #[test]
    fn test_remove_clears_everything_evictable_when_target_exceeds_it() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        store.seed(
            dir.path(),
            1000,
            &[(AssetId::new_random(), 2), (AssetId::new_random(), 4)],
        );
        store.seed(dir.path(), 2000, &[(AssetId::new_random(), 8)]);
        let cache = PartitionedTemporalGuidCache::new(dir.path(), MIN_PARTITION_INTERVAL, store.clone())
            .unwrap();

        let report = cache.remove(1_000).unwrap();

        assert_eq!(report.bytes_cleared, 14);
        assert_eq!(report.evicted.values().sum::<u64>(), report.bytes_cleared);
        assert_eq!(cache.count(), 0);
        // Only the current partition is left
        assert_eq!(cache.partition_count(), 1);
    }

    #[test]
    fn test_remove_migrates_touched_assets() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        let touched = AssetId::new_random();
        let stale = AssetId::new_random();
        store.seed(dir.path(), 1000, &[(touched, 3), (stale, 5)]);
        let cache = PartitionedTemporalGuidCache::new(dir.path(), MIN_PARTITION_INTERVAL, store.clone())
            .unwrap();

        assert!(cache.contains(touched));
        let report = cache.remove(1).unwrap();

        assert_eq!(report.bytes_cleared, 5);
        assert_eq!(report.evicted.keys().copied().collect::<Vec<_>>(), vec![stale]);
        assert!(cache.contains(touched));
        assert!(!cache.contains(stale));
        assert_eq!(store.state().copied, vec![touched]);

        // The touched asset now lives in the current partition
        let current = cache.locate(touched).unwrap();
        assert_ne!(current, dir.path().join("1000"));
        assert!(store.state().partitions[&current].contains_key(&touched));
        assert!(!store.state().partitions.contains_key(&dir.path().join("1000")));
    }

    #[test]
    fn test_remove_deletes_partition_emptied_by_migration() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        let touched = AssetId::new_random();
        let fresh = AssetId::new_random();
        store.seed(dir.path(), 1000, &[(touched, 3)]);
        let cache = PartitionedTemporalGuidCache::new(dir.path(), MIN_PARTITION_INTERVAL, store.clone())
            .unwrap();
        let path = cache.try_add(fresh, 1).unwrap().unwrap();
        store.put(&path, fresh, 1);
        cache.contains(touched);

        let report = cache.remove(1).unwrap();

        assert!(store.state().deleted.contains(&dir.path().join("1000")));
        assert_eq!(store.state().copied, vec![touched]);
        assert_eq!(cache.partition_count(), 1);
        // Migration frees nothing, so the least recently used current asset goes
        assert_eq!(report.bytes_cleared, 1);
        assert_eq!(report.evicted.keys().copied().collect::<Vec<_>>(), vec![fresh]);
        assert!(cache.contains(touched));
    }

    #[test]
    fn test_remove_copy_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        let touched = AssetId::new_random();
        store.seed(dir.path(), 1000, &[(touched, 3)]);
        let cache = PartitionedTemporalGuidCache::new(dir.path(), MIN_PARTITION_INTERVAL, store.clone())
            .unwrap();
        cache.contains(touched);
        store.state().fail_copy = true;

        let result = cache.remove(1);
        assert!(matches!(result, Err(CacheError::Partition { op: "copy", .. })));
        // The partition survives the failed retirement
        assert!(store.state().deleted.is_empty());
        assert!(cache.contains(touched));
    }

    /// Store whose copies block until the test lets them through
    struct GatedCopyStore {
        inner: MemoryStore,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl PartitionStore for GatedCopyStore {
        fn open_or_create(&self, path: &Path) -> io::Result<()> {
            self.inner.open_or_create(path)
        }

        fn delete(&self, path: &Path) -> io::Result<()> {
            self.inner.delete(path)
        }

        fn copy_asset(&self, id: AssetId, source: &Path, dest: &Path) -> io::Result<()> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.copy_asset(id, source, dest)
        }

        fn delete_asset(&self, id: AssetId, partition: &Path) -> io::Result<()> {
            self.inner.delete_asset(id, partition)
        }

        fn load_existing(&self, path: &Path) -> io::Result<Option<HashMap<AssetId, u64>>> {
            self.inner.load_existing(path)
        }
    }

    #[test]
    fn test_index_stays_usable_while_partition_is_retired() {
        let dir = tempdir().unwrap();
        let inner = MemoryStore::default();
        let touched = AssetId::new_random();
        let stale = AssetId::new_random();
        inner.seed(dir.path(), 1000, &[(touched, 3), (stale, 5)]);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = GatedCopyStore {
            inner: inner.clone(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let cache = Arc::new(
            PartitionedTemporalGuidCache::new(dir.path(), MIN_PARTITION_INTERVAL, store).unwrap(),
        );
        cache.contains(touched);

        let evictor = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.remove(1))
        };
        entered_rx.recv().unwrap();

        // The copy is in flight; lookups and adds must not wait for it
        let fresh = AssetId::new_random();
        assert!(cache.contains(stale));
        assert!(cache.try_add(fresh, 1).unwrap().is_some());
        assert_eq!(cache.count(), 3);

        release_tx.send(()).unwrap();
        let report = evictor.join().unwrap().unwrap();

        assert_eq!(report.evicted.keys().copied().collect::<Vec<_>>(), vec![stale]);
        assert!(cache.contains(touched));
        assert!(cache.contains(fresh));
        assert_eq!(inner.state().deleted, vec![dir.path().join("1000")]);
    }

    #[test]
    fn test_remove_keeps_recently_accessed_across_window_change() {
        let dir = tempdir().unwrap();
        let (cache, store) = new_cache(dir.path(), MIN_PARTITION_INTERVAL);
        let (a, b, c, d, e) = (
            AssetId::new_random(),
            AssetId::new_random(),
            AssetId::new_random(),
            AssetId::new_random(),
            AssetId::new_random(),
        );

        wait_for_window_start(MIN_PARTITION_INTERVAL);
        for asset in [a, b, c, d] {
            let path = cache.try_add(asset, 2).unwrap().unwrap();
            store.put(&path, asset, 2);
        }
        sleep(Duration::from_millis(1100));
        let path = cache.try_add(e, 2).unwrap().unwrap();
        store.put(&path, e, 2);

        cache.contains(a);
        cache.items_with_prefix(&b.to_string());

        let report = cache.remove(3).unwrap();

        let mut evicted: Vec<AssetId> = report.evicted.keys().copied().collect();
        evicted.sort();
        let mut expected = vec![c, d];
        expected.sort();
        assert_eq!(evicted, expected);
        assert_eq!(report.bytes_cleared, 4);
        assert!(cache.contains(a));
        assert!(cache.contains(b));
        assert!(cache.contains(e));
        assert_eq!(cache.count(), 3);
    }

    #[test]
    fn test_rediscovery_keeps_newest_copy_and_skips_foreign_dirs() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        let shared = AssetId::new_random();
        let old_only = AssetId::new_random();
        store.seed(dir.path(), 1000, &[(shared, 1), (old_only, 2)]);
        store.seed(dir.path(), 2000, &[(shared, 7)]);
        fs::create_dir_all(dir.path().join("3000")).unwrap();
        fs::create_dir_all(dir.path().join("scratch")).unwrap();

        let cache = PartitionedTemporalGuidCache::new(dir.path(), MIN_PARTITION_INTERVAL, store.clone())
            .unwrap();

        assert_eq!(cache.count(), 2);
        assert_eq!(cache.asset_size(shared), Some(7));
        assert!(cache.is_on_disk(shared));
        // 1000, 2000 and the current partition
        assert_eq!(cache.partition_count(), 3);

        // Retiring the oldest only evicts what it still holds
        let report = cache.remove(1).unwrap();
        assert_eq!(report.evicted.keys().copied().collect::<Vec<_>>(), vec![old_only]);
        assert!(cache.contains(shared));
    }

    #[test]
    fn test_directory_store_round_trip() {
        let dir = tempdir().unwrap();
        let asset = AssetId::new_random();
        {
            let cache = PartitionedTemporalGuidCache::new(
                dir.path(),
                day(),
                DirectoryPartitionStore::new(),
            )
            .unwrap();
            let path = cache.try_add(asset, 5).unwrap().unwrap();
            fs::write(asset_file(&path, asset), b"hello").unwrap();
        }

        let cache =
            PartitionedTemporalGuidCache::new(dir.path(), day(), DirectoryPartitionStore::new())
                .unwrap();
        assert!(cache.contains(asset));
        assert_eq!(cache.asset_size(asset), Some(5));
        let path = cache.locate(asset).unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.count(), 0);
        assert!(!asset_file(&path, asset).exists());
    }
}
