//! Liveness records for controllers and workers.
//!
//! Each beep overwrites the record of one role/identity pair; no history is
//! kept and stale records are never evicted here. Deciding when a worker is
//! dead is left to whoever displays the records.

use chrono::{DateTime, Duration, Utc};
use rh_types::StoreResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{trace, warn};

use crate::keys;
use crate::store::StoreHandle;

/// Last-seen record for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub role: String,
    pub identity: String,
    pub host_name: String,
    pub timestamp: DateTime<Utc>,
    /// Last job envelope seen by the process, `None` on idle polls.
    pub payload: Option<Value>,
}

impl Heartbeat {
    /// Time elapsed since the beep.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

/// Emits and reads heartbeats for one process identity.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    store: StoreHandle,
    identity: String,
    host_name: String,
}

impl HeartbeatMonitor {
    pub fn new(
        store: StoreHandle,
        identity: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            identity: identity.into(),
            host_name: host_name.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Overwrite this process' liveness record for `role`.
    pub async fn beep(&self, role: &str, payload: Option<Value>) -> StoreResult<()> {
        let beat = Heartbeat {
            role: role.to_string(),
            identity: self.identity.clone(),
            host_name: self.host_name.clone(),
            timestamp: Utc::now(),
            payload,
        };

        self.store
            .set(&keys::heartbeat(role, &self.identity), &serde_json::to_value(&beat)?)
            .await?;
        self.store
            .add_member(&keys::heartbeat_role(role), &Value::from(self.identity.clone()))
            .await?;

        trace!(role, identity = %self.identity, "heartbeat");
        Ok(())
    }

    /// Latest heartbeat of every identity that has reported for `role`.
    pub async fn get_heartbeats(&self, role: &str) -> StoreResult<BTreeMap<String, Heartbeat>> {
        let mut beats = BTreeMap::new();

        for member in self.store.members(&keys::heartbeat_role(role)).await? {
            let Some(identity) = member.as_str() else {
                continue;
            };
            let Some(raw) = self.store.get(&keys::heartbeat(role, identity)).await? else {
                continue;
            };
            match serde_json::from_value::<Heartbeat>(raw) {
                Ok(beat) => {
                    beats.insert(identity.to_string(), beat);
                }
                Err(e) => warn!(role, identity, error = %e, "unreadable heartbeat record"),
            }
        }

        Ok(beats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn file_store(dir: &std::path::Path) -> StoreHandle {
        Arc::new(
            FileStore::open(dir.join("store"), std::time::Duration::from_millis(10))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn beep_overwrites_previous_record() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path()).await;
        let monitor = HeartbeatMonitor::new(store, "node-a-1", "node-a");

        monitor.beep("worker", None).await.unwrap();
        monitor
            .beep("worker", Some(json!({"dataset_id": "D1", "round_id": 7})))
            .await
            .unwrap();

        let beats = monitor.get_heartbeats("worker").await.unwrap();
        assert_eq!(beats.len(), 1);
        let beat = &beats["node-a-1"];
        assert_eq!(beat.host_name, "node-a");
        assert_eq!(beat.payload.as_ref().unwrap()["round_id"], json!(7));
        assert!(beat.age(Utc::now()) >= Duration::zero());
    }

    #[tokio::test]
    async fn heartbeats_are_kept_per_identity_and_role() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path()).await;
        let first = HeartbeatMonitor::new(Arc::clone(&store), "node-a-1", "node-a");
        let second = HeartbeatMonitor::new(Arc::clone(&store), "node-a-2", "node-a");
        let controller = HeartbeatMonitor::new(store, "ctl", "node-b");

        first.beep("worker", None).await.unwrap();
        second.beep("worker", None).await.unwrap();
        controller.beep("controller", None).await.unwrap();

        let workers = first.get_heartbeats("worker").await.unwrap();
        assert_eq!(
            workers.keys().cloned().collect::<Vec<_>>(),
            vec!["node-a-1".to_string(), "node-a-2".to_string()]
        );
        let controllers = first.get_heartbeats("controller").await.unwrap();
        assert_eq!(controllers.len(), 1);
        assert!(first.get_heartbeats("unknown").await.unwrap().is_empty());
    }
}
