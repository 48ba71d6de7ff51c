//! Asset storage orchestration
//!
//! [`StorageManager`] serves get/put/check requests by combining the local
//! partition cache, a short-lived [`NegativeResultCache`] of known misses, and
//! the [`AssetReader`]/[`AssetWriter`] pair that talks to the backing store.

pub mod error;
pub mod local;
pub mod manager;
pub mod negative;
pub mod remote;
pub mod types;

pub use error::{Result, StorageError};
pub use local::LocalAssetStore;
pub use manager::StorageManager;
pub use negative::NegativeResultCache;
pub use remote::{AssetReader, AssetWriter, ReadError, WriteError};
pub use types::{Asset, CacheRule, PutResult};

pub use partition_cache::AssetId;
