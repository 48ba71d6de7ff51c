//! Asset Cache Server
//!
//! Serves assets out of a time-partitioned disk cache, retiring whole
//! partitions to stay within a byte budget.

mod error;
mod maintenance;
mod server;
mod types;

use crate::error::{Result, ServerError};
use crate::maintenance::spawn_maintenance;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::AssetCacheConfig;
use asset_storage::{LocalAssetStore, NegativeResultCache, StorageManager};
use partition_cache::{DirectoryPartitionStore, PartitionedTemporalGuidCache};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("asset_cache_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting asset cache server...");

    let config = load_config();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!(
        "Max cache size: {} MB",
        config.max_cache_size / (1024 * 1024)
    );
    info!("Partition interval: {} seconds", config.partition_interval_secs);
    info!("Negative cache TTL: {} seconds", config.negative_cache_ttl_secs);

    std::fs::create_dir_all(&config.cache_dir)?;
    let cache = Arc::new(PartitionedTemporalGuidCache::new(
        config.cache_dir.clone(),
        Duration::from_secs(config.partition_interval_secs),
        DirectoryPartitionStore::new(),
    )?);
    info!(
        entries = cache.count(),
        partitions = cache.partition_count(),
        total_bytes = cache.total_bytes(),
        "Cache index loaded"
    );

    let negative_cache = Arc::new(NegativeResultCache::new(Duration::from_secs(
        config.negative_cache_ttl_secs,
    )));
    let local = Arc::new(LocalAssetStore::new(
        Arc::clone(&cache),
        config.max_cache_size,
    ));
    let manager = StorageManager::new(
        cache,
        Arc::clone(&negative_cache),
        local.clone(),
        local.clone(),
    )
    .with_durability_timeout(Duration::from_secs(config.durability_timeout_secs));

    let _maintenance = spawn_maintenance(
        Arc::clone(&local),
        Duration::from_secs(config.maintenance_interval_secs.max(1)),
    );

    let state: SharedState = Arc::new(ServerState::new(manager, local, negative_cache));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ServerError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

fn load_config() -> AssetCacheConfig {
    let defaults = AssetCacheConfig::default();

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    AssetCacheConfig {
        port: env_or("PORT", defaults.port),
        cache_dir,
        partition_interval_secs: env_or("PARTITION_INTERVAL_SECS", defaults.partition_interval_secs),
        max_cache_size: env_or("MAX_CACHE_SIZE", defaults.max_cache_size),
        negative_cache_ttl_secs: env_or("NEGATIVE_CACHE_TTL_SECS", defaults.negative_cache_ttl_secs),
        durability_timeout_secs: env_or("DURABILITY_TIMEOUT_SECS", defaults.durability_timeout_secs),
        maintenance_interval_secs: env_or(
            "MAINTENANCE_INTERVAL_SECS",
            defaults.maintenance_interval_secs,
        ),
    }
}
