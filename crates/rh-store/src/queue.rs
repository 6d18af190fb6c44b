//! Search and results queues.

use rh_types::{JobEnvelope, RoundRecord, StoreResult};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::keys;
use crate::store::StoreHandle;

/// Producer and consumer view of the shared queues.
///
/// Entries are popped raw: a malformed envelope is the consumer's problem,
/// not a store error.
#[derive(Debug, Clone)]
pub struct JobQueue {
    store: StoreHandle,
    search_queue: String,
    results_queue: String,
}

impl JobQueue {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            search_queue: keys::SEARCH_QUEUE.to_string(),
            results_queue: keys::RESULTS_QUEUE.to_string(),
        }
    }

    pub fn with_results_queue(mut self, name: impl Into<String>) -> Self {
        self.results_queue = name.into();
        self
    }

    pub fn with_search_queue(mut self, name: impl Into<String>) -> Self {
        self.search_queue = name.into();
        self
    }

    pub fn search_queue(&self) -> &str {
        &self.search_queue
    }

    pub fn results_queue(&self) -> &str {
        &self.results_queue
    }

    pub async fn submit(&self, envelope: &JobEnvelope) -> StoreResult<()> {
        self.store
            .push_right(&self.search_queue, &serde_json::to_value(envelope)?)
            .await?;
        debug!(
            dataset = %envelope.dataset_id,
            round = envelope.round_id,
            solution = %envelope.solution,
            "job submitted"
        );
        Ok(())
    }

    /// Put an envelope at the head so it is the next one popped.
    pub async fn requeue_front(&self, envelope: &JobEnvelope) -> StoreResult<()> {
        self.store
            .push_left(&self.search_queue, &serde_json::to_value(envelope)?)
            .await
    }

    pub async fn pending(&self) -> StoreResult<usize> {
        self.store.length(&self.search_queue).await
    }

    /// Next raw entry, or `None` when nothing arrived within the wait.
    pub async fn next(&self, timeout: Duration) -> StoreResult<Option<Value>> {
        self.store.pop_right_blocking(&self.search_queue, timeout).await
    }

    pub async fn publish_result(&self, record: &RoundRecord) -> StoreResult<()> {
        self.store
            .push_right(&self.results_queue, &serde_json::to_value(record)?)
            .await
    }

    pub async fn pending_results(&self) -> StoreResult<Vec<RoundRecord>> {
        let raw = self.store.list_all(&self.results_queue).await?;
        raw.into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }
}
