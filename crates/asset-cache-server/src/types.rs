//! Configuration and response types for the asset cache server

use partition_cache::CacheStats;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the asset cache server
#[derive(Debug, Clone)]
pub struct AssetCacheConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    pub partition_interval_secs: u64,
    pub max_cache_size: u64,
    pub negative_cache_ttl_secs: u64,
    pub durability_timeout_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            port: 3002,
            cache_dir: PathBuf::from("./cache/assets"),
            partition_interval_secs: 60 * 60, // 1 hour
            max_cache_size: 1024 * 1024 * 1024, // 1GB
            negative_cache_ttl_secs: 2 * 60,
            durability_timeout_secs: 30,
            maintenance_interval_secs: 60,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
    pub negative_entries: u64,
}

/// Query string for prefix listings
#[derive(Debug, Default, Deserialize)]
pub struct PrefixQuery {
    #[serde(default)]
    pub prefix: String,
}

/// Query string for asset fetches
#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    #[serde(default = "default_cache")]
    pub cache: bool,
}

fn default_cache() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct AssetIdsResponse {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub found: bool,
}

#[derive(Debug, Serialize)]
pub struct StoreResponse {
    pub result: String,
}
