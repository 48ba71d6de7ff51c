//! Time-partitioned asset cache index
//!
//! Tracks which assets are cached locally, how large they are, and which
//! time-bucketed partition holds their bytes. Disk space is reclaimed by
//! retiring whole partitions at once; assets touched after their partition
//! stopped being current are migrated forward instead of evicted.

mod cache;
mod error;
mod store;
mod types;

pub use cache::{PartitionedTemporalGuidCache, MIN_PARTITION_INTERVAL};
pub use error::{CacheError, Result};
pub use store::{asset_file, DirectoryPartitionStore, PartitionStore};
pub use types::{AssetId, CacheStats, EvictionReport};
