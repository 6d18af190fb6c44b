//! Fixtures shared by the unit tests of this crate.

use chrono::Utc;
use rh_types::{DispatchedJob, JobEnvelope, Level, RoundRecord};
use std::collections::BTreeMap;

pub fn round_record(
    dataset: &str,
    round_id: u64,
    level: Level,
    model: &str,
    score: Option<f64>,
) -> RoundRecord {
    let envelope = match level {
        Level::Base => JobEnvelope::new(dataset, round_id, model.to_lowercase()),
        Level::Ensemble => JobEnvelope::ensemble(dataset, round_id, model.to_lowercase(), 1),
    };
    RoundRecord {
        job: DispatchedJob {
            envelope,
            start_time: "2024-03-01 09:30:05".to_string(),
            host_name: "node-a".to_string(),
        },
        model_name: model.to_string(),
        model_class: format!("{model}Model"),
        process_steps: Vec::new(),
        duration_process: 0,
        num_rounds: None,
        duration_model: 1,
        score_eval: score,
        score_test: score,
        scores_cv: vec![score],
        cv_mean: score,
        cv_std: Some(0.0),
        cv_max: score,
        eval_other_metrics: BTreeMap::new(),
        test_other_metrics: BTreeMap::new(),
        completed_at: Utc::now(),
    }
}
