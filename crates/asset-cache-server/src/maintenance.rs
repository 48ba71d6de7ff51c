//! Background budget enforcement

use asset_storage::LocalAssetStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Spawn a task that keeps the local store within its byte budget.
///
/// Runs `enforce_budget` every `every` until the returned handle is aborted.
pub fn spawn_maintenance(local: Arc<LocalAssetStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match local.enforce_budget().await {
                Ok(report) => debug!(
                    evicted = report.evicted.len(),
                    bytes_cleared = report.bytes_cleared,
                    "Maintenance pass complete"
                ),
                Err(e) => error!(error = %e, "Maintenance pass failed"),
            }
        }
    })
}
