//! Search status and round numbering per dataset.

use rh_types::StoreResult;
use serde_json::Value;
use std::fmt;

use crate::keys;
use crate::store::StoreHandle;

/// Whether the producer should keep generating rounds for a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetStatus {
    Searching,
    Pause,
    Other(String),
}

impl DatasetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DatasetStatus::Searching => "searching",
            DatasetStatus::Pause => "pause",
            DatasetStatus::Other(s) => s,
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "searching" => DatasetStatus::Searching,
            "pause" => DatasetStatus::Pause,
            other => DatasetStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DatasetControl {
    store: StoreHandle,
}

impl DatasetControl {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Current status; a dataset that was never started is paused.
    pub async fn status(&self, dataset_id: &str) -> StoreResult<DatasetStatus> {
        let status = match self.store.get(&keys::dataset_status(dataset_id)).await? {
            Some(Value::String(raw)) => DatasetStatus::parse(&raw),
            _ => DatasetStatus::Pause,
        };
        Ok(status)
    }

    pub async fn set_status(&self, dataset_id: &str, status: &DatasetStatus) -> StoreResult<()> {
        self.store
            .set(&keys::dataset_status(dataset_id), &Value::from(status.as_str()))
            .await
    }

    /// Reserve the next round id. Ids start at 1.
    pub async fn next_round_id(&self, dataset_id: &str) -> StoreResult<u64> {
        let id = self
            .store
            .increment(&keys::dataset_round_counter(dataset_id), 1)
            .await?;
        Ok(id.max(0) as u64)
    }

    /// Number of round ids handed out so far.
    pub async fn rounds_issued(&self, dataset_id: &str) -> StoreResult<u64> {
        let count = self
            .store
            .counter(&keys::dataset_round_counter(dataset_id))
            .await?;
        Ok(count.max(0) as u64)
    }
}
