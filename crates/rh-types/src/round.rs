//! Completed search rounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::job::{DispatchedJob, JobEnvelope, Level};

/// A score that may be missing when the metric produced a non-finite value.
pub type Score = Option<f64>;

/// Keep finite values, map NaN and infinities to `None`.
pub fn finite(value: f64) -> Score {
    value.is_finite().then_some(value)
}

/// One applied preprocessing step, in pipeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl ProcessStep {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Result of one executed round.
///
/// Serialized as the dispatched envelope with every enrichment field added
/// at the top level; this is the shape stored in the round ledger and pushed
/// on the results queue. Never mutated once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    #[serde(flatten)]
    pub job: DispatchedJob,
    /// Model family, used to group rounds when building ensembles.
    pub model_name: String,
    pub model_class: String,
    #[serde(default)]
    pub process_steps: Vec<ProcessStep>,
    /// Whole seconds spent in preprocessing.
    pub duration_process: u64,
    #[serde(default)]
    pub num_rounds: Option<u64>,
    /// Whole seconds spent fitting, saving and plotting.
    pub duration_model: u64,
    pub score_eval: Score,
    pub score_test: Score,
    #[serde(default)]
    pub scores_cv: Vec<Score>,
    pub cv_mean: Score,
    pub cv_std: Score,
    pub cv_max: Score,
    #[serde(default)]
    pub eval_other_metrics: BTreeMap<String, Score>,
    #[serde(default)]
    pub test_other_metrics: BTreeMap<String, Score>,
    pub completed_at: DateTime<Utc>,
}

impl RoundRecord {
    pub fn envelope(&self) -> &JobEnvelope {
        &self.job.envelope
    }

    pub fn dataset_id(&self) -> &str {
        &self.job.envelope.dataset_id
    }

    pub fn round_id(&self) -> u64 {
        self.job.envelope.round_id
    }

    pub fn level(&self) -> Level {
        self.job.envelope.level
    }

    pub fn solution(&self) -> &str {
        &self.job.envelope.solution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> RoundRecord {
        let job = DispatchedJob {
            envelope: JobEnvelope::new("D1", 7, "X").with_threshold(0.1),
            start_time: "2024-03-01 09:30:05".to_string(),
            host_name: "node-a".to_string(),
        };
        RoundRecord {
            job,
            model_name: "Mean".to_string(),
            model_class: "MeanModel".to_string(),
            process_steps: vec![ProcessStep::new("scaling", json!({"with_mean": true}))],
            duration_process: 2,
            num_rounds: Some(10),
            duration_model: 4,
            score_eval: Some(0.25),
            score_test: None,
            scores_cv: vec![Some(0.2), Some(0.3)],
            cv_mean: Some(0.25),
            cv_std: Some(0.05),
            cv_max: Some(0.3),
            eval_other_metrics: BTreeMap::from([("mae".to_string(), Some(0.2))]),
            test_other_metrics: BTreeMap::new(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn record_is_flat_envelope_plus_results() {
        let value = serde_json::to_value(sample_record()).unwrap();

        assert_eq!(value["dataset_id"], json!("D1"));
        assert_eq!(value["round_id"], json!(7));
        assert_eq!(value["level"], json!(1));
        assert_eq!(value["host_name"], json!("node-a"));
        assert_eq!(value["num_rounds"], json!(10));
        assert_eq!(value["score_eval"], json!(0.25));
        assert_eq!(value["score_test"], Value::Null);
        assert_eq!(value["process_steps"][0]["name"], json!("scaling"));
    }

    #[test]
    fn record_decodes_from_ledger_shape() {
        let record = sample_record();
        let value = serde_json::to_value(&record).unwrap();
        let back: RoundRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.round_id(), 7);
        assert_eq!(back.level(), Level::Base);
        assert_eq!(back.score_test, None);
        assert_eq!(back, record);
    }

    #[test]
    fn finite_filters_nan() {
        assert_eq!(finite(1.5), Some(1.5));
        assert_eq!(finite(f64::NAN), None);
        assert_eq!(finite(f64::INFINITY), None);
    }
}
