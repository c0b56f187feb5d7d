//! Key-value store shared by the quota ledger and persisted threads.
//!
//! Two implementations: an in-process [`MemoryStore`] and a SQLite-backed
//! [`SqliteStore`] for deployments that need state to survive restarts.
pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How often [`spawn_sweeper`] runs in production.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Atomically add `delta` to the integer at `key`, creating it at zero
    /// when absent, and return the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> anyhow::Result<i64>;

    /// Read a live (non-expired) value.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Overwrite `key` with `value`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Install or replace the expiry on an existing key. Returns `false` if
    /// the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Physically remove every expired key. Returns how many were removed.
    async fn purge_expired(&self) -> anyhow::Result<usize>;
}

/// Purge expired keys from `store` every `every` until the task is aborted.
pub fn spawn_sweeper(store: Arc<dyn KeyValueStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "purged expired keys"),
                Err(e) => warn!("purging expired keys failed: {}", e),
            }
        }
    })
}
