//! Job envelopes as pushed by the scheduler and picked up by workers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::SearchError;

/// Format used for `start_time` stamps (second resolution, local time).
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Search level of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Level {
    /// Base model fitted on the preprocessed features.
    Base,
    /// Ensemble fitted on the predictions of earlier base rounds.
    Ensemble,
}

impl Level {
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Base => 1,
            Level::Ensemble => 2,
        }
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.as_u8()
    }
}

impl TryFrom<u8> for Level {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Level::Base),
            2 => Ok(Level::Ensemble),
            other => Err(format!("unsupported search level {other}")),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A search job as created by the producer.
///
/// Fields are fixed at creation; workers never modify an envelope but wrap it
/// into a [`DispatchedJob`] and, once executed, into a round record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub dataset_id: String,
    /// Unique per dataset.
    pub round_id: u64,
    pub level: Level,
    /// Model-family identifier, resolved through the model registry.
    pub solution: String,
    #[serde(default)]
    pub model_params: Map<String, Value>,
    /// Outlier-rejection bound handed to the model.
    pub threshold: f64,
    /// Number of extra rounds per model family in the ensemble pool
    /// (level 2 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble_depth: Option<usize>,
}

impl JobEnvelope {
    /// Create a level-1 envelope.
    pub fn new(dataset_id: impl Into<String>, round_id: u64, solution: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            round_id,
            level: Level::Base,
            solution: solution.into(),
            model_params: Map::new(),
            threshold: 0.0,
            ensemble_depth: None,
        }
    }

    /// Create a level-2 (ensemble) envelope.
    pub fn ensemble(
        dataset_id: impl Into<String>,
        round_id: u64,
        solution: impl Into<String>,
        depth: usize,
    ) -> Self {
        Self {
            level: Level::Ensemble,
            ensemble_depth: Some(depth),
            ..Self::new(dataset_id, round_id, solution)
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.model_params.insert(name.into(), value);
        self
    }

    /// Check the invariants a worker relies on before executing the job.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.dataset_id.trim().is_empty() {
            return Err(SearchError::InvalidEnvelope {
                message: "dataset_id is empty".to_string(),
            });
        }
        if self.solution.trim().is_empty() {
            return Err(SearchError::InvalidEnvelope {
                message: format!("solution is empty for round {}", self.round_id),
            });
        }
        if !self.threshold.is_finite() {
            return Err(SearchError::InvalidEnvelope {
                message: format!("threshold {} is not finite", self.threshold),
            });
        }
        if self.level == Level::Ensemble && self.ensemble_depth.is_none() {
            return Err(SearchError::InvalidEnvelope {
                message: format!("ensemble round {} has no ensemble_depth", self.round_id),
            });
        }
        Ok(())
    }

    /// Pool depth for level-2 rounds, `0` when unset.
    pub fn depth(&self) -> usize {
        self.ensemble_depth.unwrap_or(0)
    }
}

/// An envelope received by a worker, stamped with where and when it started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedJob {
    #[serde(flatten)]
    pub envelope: JobEnvelope,
    pub start_time: String,
    pub host_name: String,
}

impl DispatchedJob {
    pub fn new(envelope: JobEnvelope, host_name: impl Into<String>) -> Self {
        Self::stamped_at(envelope, host_name, Local::now())
    }

    pub fn stamped_at(
        envelope: JobEnvelope,
        host_name: impl Into<String>,
        started: DateTime<Local>,
    ) -> Self {
        Self {
            envelope,
            start_time: started.format(START_TIME_FORMAT).to_string(),
            host_name: host_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn level_serializes_as_number() {
        let envelope = JobEnvelope::new("D1", 7, "X").with_threshold(0.1);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["level"], json!(1));
        assert!(value.get("ensemble_depth").is_none());

        let ensemble = JobEnvelope::ensemble("D1", 8, "stack", 1);
        let value = serde_json::to_value(&ensemble).unwrap();
        assert_eq!(value["level"], json!(2));
        assert_eq!(value["ensemble_depth"], json!(1));
    }

    #[test]
    fn unknown_level_is_rejected() {
        let raw = json!({
            "dataset_id": "D1",
            "round_id": 1,
            "level": 3,
            "solution": "X",
            "threshold": 0.1
        });
        assert!(serde_json::from_value::<JobEnvelope>(raw).is_err());
    }

    #[test]
    fn producer_envelope_decodes_without_params() {
        let raw = json!({
            "dataset_id": "D1",
            "round_id": 12,
            "level": 1,
            "solution": "lgbm",
            "threshold": 0.5
        });
        let envelope: JobEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.round_id, 12);
        assert!(envelope.model_params.is_empty());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn validation_catches_missing_depth() {
        let mut envelope = JobEnvelope::ensemble("D1", 3, "stack", 2);
        envelope.ensemble_depth = None;
        match envelope.validate() {
            Err(SearchError::InvalidEnvelope { message }) => {
                assert!(message.contains("ensemble_depth"))
            }
            other => panic!("expected InvalidEnvelope, got {other:?}"),
        }

        let envelope = JobEnvelope::new("", 3, "X");
        assert!(envelope.validate().is_err());

        let envelope = JobEnvelope::new("D1", 3, "X").with_threshold(f64::NAN);
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn dispatched_job_flattens_envelope() {
        let started = Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 5).unwrap();
        let job = DispatchedJob::stamped_at(
            JobEnvelope::new("D1", 7, "X").with_param("depth", json!(4)),
            "node-a",
            started,
        );

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["dataset_id"], json!("D1"));
        assert_eq!(value["model_params"]["depth"], json!(4));
        assert_eq!(value["start_time"], json!("2024-03-01 09:30:05"));
        assert_eq!(value["host_name"], json!("node-a"));
    }
}
