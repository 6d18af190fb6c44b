//! Per-dataset ledger of completed rounds.

use rh_types::{Level, ObjectiveDirection, RoundRecord, StoreResult};
use std::collections::BTreeMap;
use tracing::warn;

use crate::keys;
use crate::store::StoreHandle;

/// Append-only list of round records, one list key per dataset.
///
/// Appends are single pushes, so workers running rounds of the same dataset
/// concurrently never overwrite each other on the Redis backend.
#[derive(Debug, Clone)]
pub struct RoundLedger {
    store: StoreHandle,
}

impl RoundLedger {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub async fn append(&self, record: &RoundRecord) -> StoreResult<()> {
        let value = serde_json::to_value(record)?;
        self.store
            .push_right(&keys::dataset_rounds(record.dataset_id()), &value)
            .await
    }

    pub async fn len(&self, dataset_id: &str) -> StoreResult<usize> {
        self.store.length(&keys::dataset_rounds(dataset_id)).await
    }

    /// Every decodable record of the dataset, in completion order.
    pub async fn rounds(&self, dataset_id: &str) -> StoreResult<RoundTable> {
        let raw = self.store.list_all(&keys::dataset_rounds(dataset_id)).await?;
        let mut records = Vec::with_capacity(raw.len());
        for (position, value) in raw.into_iter().enumerate() {
            match serde_json::from_value::<RoundRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    dataset = dataset_id,
                    position,
                    error = %e,
                    "skipping undecodable round record"
                ),
            }
        }
        Ok(RoundTable::new(records))
    }
}

/// Rounds of one dataset, queryable for ensembles and reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundTable {
    records: Vec<RoundRecord>,
}

impl RoundTable {
    pub fn new(records: Vec<RoundRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoundRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RoundRecord> {
        self.records
    }

    pub fn at_level(&self, level: Level) -> RoundTable {
        self.filtered(|r| r.level() == level)
    }

    pub fn for_model(&self, model_name: &str) -> RoundTable {
        self.filtered(|r| r.model_name == model_name)
    }

    pub fn find(&self, round_id: u64) -> Option<&RoundRecord> {
        self.records.iter().find(|r| r.round_id() == round_id)
    }

    pub fn counts_by_level(&self) -> BTreeMap<Level, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.level()).or_insert(0) += 1;
        }
        counts
    }

    /// Best-scoring round of every model family, ordered by family name.
    /// Rounds without an eval score are ignored.
    pub fn best_per_model(&self, direction: ObjectiveDirection) -> Vec<&RoundRecord> {
        let mut best: BTreeMap<&str, &RoundRecord> = BTreeMap::new();
        for record in &self.records {
            let Some(score) = record.score_eval else {
                continue;
            };
            match best.get(record.model_name.as_str()) {
                Some(current) => {
                    let current_score = current.score_eval.unwrap_or(f64::NAN);
                    if direction.improves(score, current_score) || current_score.is_nan() {
                        best.insert(&record.model_name, record);
                    }
                }
                None => {
                    best.insert(&record.model_name, record);
                }
            }
        }
        best.into_values().collect()
    }

    fn filtered(&self, keep: impl Fn(&RoundRecord) -> bool) -> RoundTable {
        RoundTable::new(self.records.iter().filter(|r| keep(r)).cloned().collect())
    }
}
