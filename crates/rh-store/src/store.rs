//! The key-value store contract shared by every backend.
//!
//! Values are JSON. A key holds either a scalar, a list (used as a FIFO
//! queue) or a set. Two backends implement the contract:
//! - [`RedisStore`](crate::redis_store::RedisStore): native atomic commands.
//! - [`FileStore`](crate::file::FileStore): one JSON file per key, rewritten
//!   wholesale on every mutation. Only safe with a single writing process.

use async_trait::async_trait;
use rh_types::StoreResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::file::FileStore;
use crate::redis_store::RedisStore;

/// Shared store handle passed to every component that needs the store.
pub type StoreHandle = Arc<dyn KeyValueStore>;

/// Which backend a store handle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    File,
    Redis,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::File => write!(f, "file"),
            BackendKind::Redis => write!(f, "redis"),
        }
    }
}

/// Uniform store operations.
///
/// List semantics: `push_right` appends at the tail, `push_left` inserts at
/// the head, and both pops remove the head. `push_right` followed by
/// `pop_right` is therefore FIFO on every backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    fn backend(&self) -> BackendKind;

    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    async fn set(&self, key: &str, value: &Value) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// No-op if the key is absent.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Add `amount` to an integer counter, creating it at `amount`.
    async fn increment(&self, key: &str, amount: i64) -> StoreResult<i64>;

    /// Current counter value, `0` when absent.
    async fn counter(&self, key: &str) -> StoreResult<i64>;

    async fn push_right(&self, key: &str, value: &Value) -> StoreResult<()>;

    async fn push_left(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Remove and return the oldest element, `None` when empty or absent.
    async fn pop_right(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Like [`pop_right`](Self::pop_right) but waits for an element.
    ///
    /// `None` means "nothing yet, poll again"; it never signals a closed
    /// queue. The Redis backend blocks for up to `timeout`; the file backend
    /// checks once and sleeps its poll interval on an empty list.
    async fn pop_right_blocking(&self, key: &str, timeout: Duration) -> StoreResult<Option<Value>>;

    /// Remove every element equal to `value`.
    async fn remove_value(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Whole list, empty when absent.
    async fn list_all(&self, key: &str) -> StoreResult<Vec<Value>>;

    async fn length(&self, key: &str) -> StoreResult<usize>;

    async fn add_member(&self, key: &str, value: &Value) -> StoreResult<()>;

    async fn members(&self, key: &str) -> StoreResult<Vec<Value>>;
}

/// Requested store backend and its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Redis URL or bare host name.
    #[serde(default = "default_url")]
    pub url: String,
    /// Folder holding one file per key for the file backend.
    pub folder: PathBuf,
    /// Sleep between empty polls on the file backend.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_url() -> String {
    "redis://127.0.0.1/".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl StoreConfig {
    pub fn file(folder: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::File,
            url: default_url(),
            folder: folder.into(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn redis(url: impl Into<String>, fallback_folder: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Redis,
            url: url.into(),
            ..Self::file(fallback_folder)
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Open the configured backend.
///
/// An unreachable Redis server is not fatal: the file backend is used
/// instead and a warning is logged.
pub async fn connect(config: &StoreConfig) -> StoreResult<StoreHandle> {
    if config.backend == BackendKind::Redis {
        match RedisStore::connect(&config.url).await {
            Ok(store) => {
                info!(url = %store.url(), "using redis store");
                return Ok(Arc::new(store));
            }
            Err(e) => {
                warn!(
                    url = %config.url,
                    error = %e,
                    "redis store unreachable, falling back to file store"
                );
            }
        }
    }

    let store = FileStore::open(&config.folder, config.poll_interval()).await?;
    info!(folder = %config.folder.display(), "using file store");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn unreachable_redis_falls_back_to_file_store() {
        let dir = tempdir().unwrap();
        // Port 1 is reserved and never runs a redis server.
        let config = StoreConfig::redis("redis://127.0.0.1:1/", dir.path().join("store"));

        let store = connect(&config).await.unwrap();
        assert_eq!(store.backend(), BackendKind::File);

        store.set("probe", &Value::from(1)).await.unwrap();
        assert_eq!(store.get("probe").await.unwrap(), Some(Value::from(1)));
    }

    #[test]
    fn config_defaults_from_json() {
        let raw = serde_json::json!({"backend": "file", "folder": "/tmp/rh"});
        let config: StoreConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.url, "redis://127.0.0.1/");
    }
}
