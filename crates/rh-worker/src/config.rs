//! Worker configuration.
//!
//! Loaded from the JSON file named by `ROUNDHOUSE_CONFIG` when set, then
//! overridden field by field from `ROUNDHOUSE_*` environment variables.

use rh_store::{BackendKind, DataLayout, StoreConfig};
use rh_types::{config_error, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "ROUNDHOUSE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Root of datasets, predictions, error logs and the file store.
    pub data_folder: PathBuf,
    pub store: BackendKind,
    pub store_url: String,
    pub search_queue: String,
    pub results_queue: String,
    /// File store sleep between empty polls.
    pub poll_interval_ms: u64,
    /// Redis wait for a job before the next heartbeat.
    pub blocking_timeout_ms: u64,
    /// Heartbeat role.
    pub role: String,
    /// Solutions this worker must be able to run; checked at startup.
    pub solutions: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_folder: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("roundhouse"),
            store: BackendKind::File,
            store_url: "redis://127.0.0.1/".to_string(),
            search_queue: rh_store::keys::SEARCH_QUEUE.to_string(),
            results_queue: rh_store::keys::RESULTS_QUEUE.to_string(),
            poll_interval_ms: 1000,
            blocking_timeout_ms: 5000,
            role: "worker".to_string(),
            solutions: Vec::new(),
        }
    }
}

fn parse_ms(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| config_error!(name, "expected milliseconds, got {raw:?}"))
}

impl WorkerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Configuration of this process: file, then environment, validated.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ROUNDHOUSE_*` overrides found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ROUNDHOUSE_DATA") {
            self.data_folder = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROUNDHOUSE_STORE") {
            self.store = match v.trim().to_ascii_lowercase().as_str() {
                "file" => BackendKind::File,
                "redis" => BackendKind::Redis,
                other => {
                    return Err(config_error!(
                        "ROUNDHOUSE_STORE",
                        "expected file or redis, got {other:?}"
                    ))
                }
            };
        }
        if let Some(v) = lookup("ROUNDHOUSE_STORE_URL") {
            self.store_url = v;
        }
        if let Some(v) = lookup("ROUNDHOUSE_SEARCH_QUEUE") {
            self.search_queue = v;
        }
        if let Some(v) = lookup("ROUNDHOUSE_RESULTS_QUEUE") {
            self.results_queue = v;
        }
        if let Some(v) = lookup("ROUNDHOUSE_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_ms("ROUNDHOUSE_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("ROUNDHOUSE_BLOCKING_TIMEOUT_MS") {
            self.blocking_timeout_ms = parse_ms("ROUNDHOUSE_BLOCKING_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ROUNDHOUSE_ROLE") {
            self.role = v;
        }
        if let Some(v) = lookup("ROUNDHOUSE_SOLUTIONS") {
            self.solutions = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("search_queue", &self.search_queue),
            ("results_queue", &self.results_queue),
            ("role", &self.role),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing {
                    name: name.to_string(),
                });
            }
        }
        if self.store == BackendKind::Redis && self.store_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "store_url".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(config_error!("poll_interval_ms", "must be positive"));
        }
        if self.blocking_timeout_ms == 0 {
            return Err(config_error!("blocking_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_folder)
    }

    pub fn store_config(&self) -> StoreConfig {
        let folder = self.layout().store_folder();
        let config = match self.store {
            BackendKind::File => StoreConfig::file(folder),
            BackendKind::Redis => StoreConfig::redis(&self.store_url, folder),
        };
        config.with_poll_interval(self.poll_interval())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = WorkerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.store, BackendKind::File);
        assert_eq!(config.results_queue, "controller:results_queue");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.blocking_timeout(), Duration::from_secs(5));
        assert!(config.data_folder.ends_with("roundhouse"));
    }

    #[test]
    fn file_then_environment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(
            &path,
            r#"{"data_folder": "/srv/rh", "role": "gpu-worker", "poll_interval_ms": 250}"#,
        )
        .unwrap();

        let mut config = WorkerConfig::from_file(&path).unwrap();
        assert_eq!(config.role, "gpu-worker");
        assert_eq!(config.blocking_timeout_ms, 5000);

        config
            .apply_overrides(env(&[
                ("ROUNDHOUSE_STORE", "Redis"),
                ("ROUNDHOUSE_STORE_URL", "cache-host"),
                ("ROUNDHOUSE_SOLUTIONS", "mean, ensemble_mean,"),
            ]))
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.store, BackendKind::Redis);
        assert_eq!(config.solutions, vec!["mean", "ensemble_mean"]);
        let store = config.store_config();
        assert_eq!(store.url, "cache-host");
        assert_eq!(store.folder, PathBuf::from("/srv/rh/store"));
        assert_eq!(store.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut config = WorkerConfig::default();
        let err = config
            .apply_overrides(env(&[("ROUNDHOUSE_STORE", "postgres")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = config
            .apply_overrides(env(&[("ROUNDHOUSE_POLL_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        config.apply_overrides(env(&[("ROUNDHOUSE_ROLE", " ")])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Missing { .. })));

        let err = WorkerConfig::from_file("/nonexistent/worker.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
