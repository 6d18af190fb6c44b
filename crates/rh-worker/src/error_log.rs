//! Per-dataset log of failed rounds, one JSON object per line.

use chrono::Local;
use rh_store::DataLayout;
use rh_types::{JobEnvelope, StoreResult, START_TIME_FORMAT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub time: String,
    pub dataset_id: String,
    pub round_id: u64,
    pub solution: String,
    #[serde(default)]
    pub model_params: Map<String, Value>,
    pub host_name: String,
    pub error: String,
}

impl ErrorEntry {
    pub fn new(envelope: &JobEnvelope, host_name: &str, error: impl Into<String>) -> Self {
        Self {
            time: Local::now().format(START_TIME_FORMAT).to_string(),
            dataset_id: envelope.dataset_id.clone(),
            round_id: envelope.round_id,
            solution: envelope.solution.clone(),
            model_params: envelope.model_params.clone(),
            host_name: host_name.to_string(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorLog {
    layout: DataLayout,
}

impl ErrorLog {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    pub async fn append(&self, entry: &ErrorEntry) -> StoreResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        tokio::fs::create_dir_all(self.layout.dataset_folder(&entry.dataset_id)).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.error_log_path(&entry.dataset_id))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Logged failures of a dataset, oldest first.
    pub async fn entries(&self, dataset_id: &str) -> StoreResult<Vec<ErrorEntry>> {
        let text = match tokio::fs::read_to_string(self.layout.error_log_path(dataset_id)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    dataset = dataset_id,
                    line = n + 1,
                    error = %e,
                    "unreadable error log line"
                ),
            }
        }
        Ok(entries)
    }
}
