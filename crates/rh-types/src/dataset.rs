//! Dataset descriptors and cached train/eval/test splits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::errors::SearchError;

/// Kind of supervised problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    Regression,
    Classification,
}

/// Whether a metric improves when it grows or when it shrinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    /// Order two scores so that the better one sorts first.
    pub fn best_first(self, a: f64, b: f64) -> Ordering {
        match self {
            ObjectiveDirection::Minimize => a.total_cmp(&b),
            ObjectiveDirection::Maximize => b.total_cmp(&a),
        }
    }

    /// Whether `candidate` strictly improves on `current`.
    pub fn improves(self, candidate: f64, current: f64) -> bool {
        self.best_first(candidate, current) == Ordering::Less
    }
}

/// Primary metric of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(default)]
    pub direction: ObjectiveDirection,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }
}

/// What the dataset catalog knows about a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub dataset_id: String,
    #[serde(default)]
    pub name: String,
    pub problem_type: ProblemType,
    #[serde(default)]
    pub x_cols: Vec<String>,
    #[serde(default)]
    pub cat_cols: Vec<String>,
    #[serde(default)]
    pub text_cols: Vec<String>,
    #[serde(default)]
    pub missing_cols: Vec<String>,
    pub metric: MetricSpec,
    #[serde(default)]
    pub other_metrics: Vec<String>,
}

impl DatasetDescriptor {
    pub fn new(
        dataset_id: impl Into<String>,
        problem_type: ProblemType,
        metric: MetricSpec,
    ) -> Self {
        let dataset_id = dataset_id.into();
        Self {
            name: dataset_id.clone(),
            dataset_id,
            problem_type,
            x_cols: Vec::new(),
            cat_cols: Vec::new(),
            text_cols: Vec::new(),
            missing_cols: Vec::new(),
            metric,
            other_metrics: Vec::new(),
        }
    }

    pub fn with_columns(mut self, x_cols: Vec<String>) -> Self {
        self.x_cols = x_cols;
        self
    }

    pub fn with_other_metrics(mut self, metrics: Vec<String>) -> Self {
        self.other_metrics = metrics;
        self
    }
}

/// Feature table handed to external preprocessing and models as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl FeatureFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Cached train/holdout split with its cross-validation layout.
///
/// `cv_folds[k]` lists the train rows evaluated in fold `k`; `i_eval` is the
/// concatenation of those lists and maps the k-th concatenated eval
/// prediction back to its train row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSplit {
    pub x_train: FeatureFrame,
    pub y_train: Vec<f64>,
    pub x_test: FeatureFrame,
    pub y_test: Vec<f64>,
    pub cv_folds: Vec<Vec<usize>>,
    pub y_eval_list: Vec<Vec<f64>>,
    pub y_eval: Vec<f64>,
    pub i_eval: Vec<usize>,
}

impl DataSplit {
    /// Build a split from targets and fold layout, deriving `y_eval_list`,
    /// `y_eval` and `i_eval` from `cv_folds`.
    pub fn from_folds(
        x_train: FeatureFrame,
        y_train: Vec<f64>,
        x_test: FeatureFrame,
        y_test: Vec<f64>,
        cv_folds: Vec<Vec<usize>>,
    ) -> Self {
        let i_eval: Vec<usize> = cv_folds.iter().flatten().copied().collect();
        let y_eval_list: Vec<Vec<f64>> = cv_folds
            .iter()
            .map(|fold| fold.iter().filter_map(|&i| y_train.get(i).copied()).collect())
            .collect();
        let y_eval = y_eval_list.iter().flatten().copied().collect();
        Self {
            x_train,
            y_train,
            x_test,
            y_test,
            cv_folds,
            y_eval_list,
            y_eval,
            i_eval,
        }
    }

    /// Check that the eval layout covers every train row exactly once.
    pub fn validate(&self, dataset_id: &str) -> Result<(), SearchError> {
        let invalid = |message: String| SearchError::InvalidSplit {
            dataset_id: dataset_id.to_string(),
            message,
        };

        let n = self.y_train.len();
        if self.i_eval.len() != n {
            return Err(invalid(format!(
                "i_eval has {} entries for {} train rows",
                self.i_eval.len(),
                n
            )));
        }
        let mut seen = vec![false; n];
        for &i in &self.i_eval {
            if i >= n {
                return Err(invalid(format!("i_eval index {i} out of range")));
            }
            if std::mem::replace(&mut seen[i], true) {
                return Err(invalid(format!("i_eval index {i} appears twice")));
            }
        }
        if !self.i_eval.iter().eq(self.cv_folds.iter().flatten()) {
            return Err(invalid("i_eval is not the concatenation of cv_folds".to_string()));
        }
        if self.y_eval_list.len() != self.cv_folds.len() {
            return Err(invalid(format!(
                "{} eval target folds for {} cv folds",
                self.y_eval_list.len(),
                self.cv_folds.len()
            )));
        }
        for (k, (targets, fold)) in self.y_eval_list.iter().zip(&self.cv_folds).enumerate() {
            if targets.len() != fold.len() {
                return Err(invalid(format!(
                    "fold {k} has {} eval targets for {} rows",
                    targets.len(),
                    fold.len()
                )));
            }
        }
        Ok(())
    }

    /// Replace the targets and rederive `y_eval_list` and `y_eval` from
    /// `cv_folds`.
    pub fn set_targets(&mut self, y_train: Vec<f64>, y_test: Vec<f64>) {
        self.y_eval_list = self
            .cv_folds
            .iter()
            .map(|fold| fold.iter().filter_map(|&i| y_train.get(i).copied()).collect())
            .collect();
        self.y_eval = self.y_eval_list.iter().flatten().copied().collect();
        self.y_train = y_train;
        self.y_test = y_test;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize) -> FeatureFrame {
        FeatureFrame::new(
            vec!["x".to_string()],
            (0..n).map(|i| vec![Value::from(i)]).collect(),
        )
    }

    #[test]
    fn direction_orders_best_first() {
        let mut scores = vec![0.3, 0.1, 0.2];
        scores.sort_by(|a, b| ObjectiveDirection::Minimize.best_first(*a, *b));
        assert_eq!(scores, vec![0.1, 0.2, 0.3]);

        scores.sort_by(|a, b| ObjectiveDirection::Maximize.best_first(*a, *b));
        assert_eq!(scores, vec![0.3, 0.2, 0.1]);

        assert!(ObjectiveDirection::Maximize.improves(0.9, 0.8));
        assert!(!ObjectiveDirection::Minimize.improves(0.9, 0.8));
    }

    #[test]
    fn split_from_folds_derives_eval_layout() {
        let split = DataSplit::from_folds(
            frame(4),
            vec![10.0, 11.0, 12.0, 13.0],
            frame(1),
            vec![1.0],
            vec![vec![2, 0], vec![3, 1]],
        );

        assert_eq!(split.i_eval, vec![2, 0, 3, 1]);
        assert_eq!(split.y_eval_list, vec![vec![12.0, 10.0], vec![13.0, 11.0]]);
        assert_eq!(split.y_eval, vec![12.0, 10.0, 13.0, 11.0]);
        assert!(split.validate("D1").is_ok());
    }

    #[test]
    fn split_validation_rejects_duplicate_rows() {
        let mut split = DataSplit::from_folds(
            frame(2),
            vec![1.0, 2.0],
            frame(0),
            vec![],
            vec![vec![0], vec![1]],
        );
        split.i_eval = vec![0, 0];

        match split.validate("D1") {
            Err(SearchError::InvalidSplit { message, .. }) => assert!(message.contains("twice")),
            other => panic!("expected InvalidSplit, got {other:?}"),
        }
    }

    #[test]
    fn split_validation_rejects_inconsistent_layout() {
        let folds = vec![vec![1, 0], vec![2]];
        let mut split =
            DataSplit::from_folds(frame(3), vec![1.0, 2.0, 3.0], frame(0), vec![], folds);
        split.i_eval = vec![0, 1, 2];
        match split.validate("D1") {
            Err(SearchError::InvalidSplit { message, .. }) => {
                assert!(message.contains("concatenation"))
            }
            other => panic!("expected InvalidSplit, got {other:?}"),
        }

        split.i_eval = vec![1, 0, 2];
        split.y_eval_list = vec![vec![2.0], vec![3.0, 1.0]];
        match split.validate("D1") {
            Err(SearchError::InvalidSplit { message, .. }) => assert!(message.contains("fold 0")),
            other => panic!("expected InvalidSplit, got {other:?}"),
        }
    }

    #[test]
    fn new_targets_refresh_eval_layout() {
        let mut split = DataSplit::from_folds(
            frame(3),
            vec![1.0, 2.0, 3.0],
            frame(1),
            vec![4.0],
            vec![vec![2, 0], vec![1]],
        );
        split.set_targets(vec![10.0, 20.0, 30.0], vec![40.0]);

        assert_eq!(split.y_eval_list, vec![vec![30.0, 10.0], vec![20.0]]);
        assert_eq!(split.y_eval, vec![30.0, 10.0, 20.0]);
        assert_eq!(split.y_test, vec![40.0]);
        assert!(split.validate("D1").is_ok());
    }

    #[test]
    fn descriptor_defaults_direction_to_minimize() {
        let raw = serde_json::json!({
            "dataset_id": "D1",
            "problem_type": "regression",
            "metric": {"name": "rmse"}
        });
        let descriptor: DatasetDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(descriptor.metric.direction, ObjectiveDirection::Minimize);
        assert!(descriptor.other_metrics.is_empty());
    }
}
