//! Ensemble pools built from earlier level-1 rounds.

use rh_store::{PredictionStore, RoundLedger, RoundTable};
use rh_types::{Level, ObjectiveDirection, RoundRecord, SearchResult};
use tracing::debug;

/// Cached predictions of one earlier round.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEntry {
    pub round_id: u64,
    pub model_name: String,
    /// Out-of-fold predictions in train row order.
    pub eval: Vec<f64>,
    pub test: Vec<f64>,
}

/// Members of one level-2 round, in selection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnsemblePool {
    pub depth: usize,
    pub entries: Vec<PoolEntry>,
}

impl EnsemblePool {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn round_ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.round_id).collect()
    }
}

/// Pick the rounds of a pool of depth `depth`.
///
/// Only level-1 rounds with an eval score qualify. Families are walked by
/// name; within a family rounds are ranked best first for `direction`, ties
/// going to the older round, and the first `depth + 1` are kept.
pub fn select_rounds(
    table: &RoundTable,
    depth: usize,
    direction: ObjectiveDirection,
) -> Vec<&RoundRecord> {
    let mut candidates: Vec<(&RoundRecord, f64)> = table
        .iter()
        .filter(|r| r.level() == Level::Base)
        .filter_map(|r| r.score_eval.map(|score| (r, score)))
        .collect();

    candidates.sort_by(|(a, score_a), (b, score_b)| {
        a.model_name
            .cmp(&b.model_name)
            .then_with(|| direction.best_first(*score_a, *score_b))
            .then_with(|| a.round_id().cmp(&b.round_id()))
    });

    let mut selected = Vec::new();
    let mut family: Option<&str> = None;
    let mut taken = 0;
    for (record, _) in candidates {
        if family != Some(record.model_name.as_str()) {
            family = Some(record.model_name.as_str());
            taken = 0;
        }
        if taken <= depth {
            selected.push(record);
        }
        taken += 1;
    }
    selected
}

#[derive(Debug, Clone)]
pub struct EnsemblePoolBuilder {
    ledger: RoundLedger,
    predictions: PredictionStore,
}

impl EnsemblePoolBuilder {
    pub fn new(ledger: RoundLedger, predictions: PredictionStore) -> Self {
        Self { ledger, predictions }
    }

    /// Load the pool for a level-2 round. Reads only, so concurrent builds
    /// for the same dataset are fine. No qualifying round gives an empty pool.
    pub async fn build(
        &self,
        dataset_id: &str,
        depth: usize,
        direction: ObjectiveDirection,
    ) -> SearchResult<EnsemblePool> {
        let table = self.ledger.rounds(dataset_id).await?;
        let selected = select_rounds(&table, depth, direction);

        let mut entries = Vec::with_capacity(selected.len());
        for record in selected {
            let (eval, test) = self.predictions.load(dataset_id, record.round_id()).await?;
            entries.push(PoolEntry {
                round_id: record.round_id(),
                model_name: record.model_name.clone(),
                eval,
                test,
            });
        }

        debug!(
            dataset = dataset_id,
            depth,
            members = entries.len(),
            candidates = table.len(),
            "ensemble pool built"
        );
        Ok(EnsemblePool { depth, entries })
    }
}
