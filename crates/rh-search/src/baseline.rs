//! Baseline models shipped with the worker.
//!
//! `mean` predicts the training mean and `ensemble_mean` averages the members
//! of its pool. Neither ever flags an outlier.

use rh_types::{DataSplit, Level, SearchError, SearchResult};
use std::sync::Arc;

use crate::model::{CvOutput, ModelFactory, ModelRegistry, ModelSpec, SearchModel};
use crate::pool::EnsemblePool;

pub const MEAN: &str = "mean";
pub const ENSEMBLE_MEAN: &str = "ensemble_mean";

pub fn register_baselines(registry: &mut ModelRegistry) {
    registry.register(MEAN, Arc::new(MeanFactory));
    registry.register(ENSEMBLE_MEAN, Arc::new(EnsembleMeanFactory));
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Element-wise mean of equally long vectors.
fn average(columns: &[&[f64]]) -> SearchResult<Vec<f64>> {
    let Some(first) = columns.first() else {
        return Ok(Vec::new());
    };
    let len = first.len();
    if columns.iter().any(|c| c.len() != len) {
        return Err(SearchError::PredictionShape {
            message: "pool members have different prediction lengths".to_string(),
        });
    }
    Ok((0..len)
        .map(|i| mean(columns.iter().map(|c| c[i])))
        .collect())
}

#[derive(Debug, Clone, Copy)]
pub struct MeanFactory;

impl ModelFactory for MeanFactory {
    fn model_name(&self) -> &str {
        "Mean"
    }

    fn level(&self) -> Level {
        Level::Base
    }

    fn build(&self, _spec: ModelSpec<'_>) -> SearchResult<Box<dyn SearchModel>> {
        Ok(Box::new(MeanModel::default()))
    }
}

/// Predicts, for each fold, the mean target of the rows outside it.
#[derive(Debug, Default)]
pub struct MeanModel {
    folds_fitted: Option<u64>,
}

impl SearchModel for MeanModel {
    fn class_name(&self) -> &str {
        "MeanModel"
    }

    fn cv(&mut self, split: &DataSplit, _threshold: f64) -> SearchResult<CvOutput> {
        let mut eval_folds = Vec::with_capacity(split.cv_folds.len());
        let mut test_folds = Vec::with_capacity(split.cv_folds.len());

        for fold in &split.cv_folds {
            let mut held_out = vec![false; split.y_train.len()];
            for &i in fold {
                if let Some(flag) = held_out.get_mut(i) {
                    *flag = true;
                }
            }
            let fitted = mean(
                split
                    .y_train
                    .iter()
                    .zip(&held_out)
                    .filter(|(_, out)| !**out)
                    .map(|(y, _)| *y),
            );
            eval_folds.push(vec![fitted; fold.len()]);
            test_folds.push(vec![fitted; split.y_test.len()]);
        }

        self.folds_fitted = Some(split.cv_folds.len() as u64);
        Ok(CvOutput::new(eval_folds, test_folds))
    }

    fn cv_pool(
        &mut self,
        _pool: &EnsemblePool,
        _split: &DataSplit,
        _threshold: f64,
    ) -> SearchResult<CvOutput> {
        Err(SearchError::collaborator("cv", "mean is a level-1 model"))
    }

    fn num_rounds(&self) -> Option<u64> {
        self.folds_fitted
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnsembleMeanFactory;

impl ModelFactory for EnsembleMeanFactory {
    fn model_name(&self) -> &str {
        "Ensemble Mean"
    }

    fn level(&self) -> Level {
        Level::Ensemble
    }

    fn build(&self, _spec: ModelSpec<'_>) -> SearchResult<Box<dyn SearchModel>> {
        Ok(Box::new(EnsembleMeanModel::default()))
    }
}

/// Averages the pool members' out-of-fold and holdout predictions.
#[derive(Debug, Default)]
pub struct EnsembleMeanModel {
    members: Option<u64>,
}

impl SearchModel for EnsembleMeanModel {
    fn class_name(&self) -> &str {
        "EnsembleMeanModel"
    }

    fn cv(&mut self, _split: &DataSplit, _threshold: f64) -> SearchResult<CvOutput> {
        Err(SearchError::collaborator("cv", "ensemble_mean needs an ensemble pool"))
    }

    fn cv_pool(
        &mut self,
        pool: &EnsemblePool,
        split: &DataSplit,
        _threshold: f64,
    ) -> SearchResult<CvOutput> {
        let evals: Vec<&[f64]> = pool.entries.iter().map(|e| e.eval.as_slice()).collect();
        let tests: Vec<&[f64]> = pool.entries.iter().map(|e| e.test.as_slice()).collect();
        let eval = average(&evals)?;
        let test = average(&tests)?;

        if eval.len() != split.y_train.len() {
            return Err(SearchError::PredictionShape {
                message: format!(
                    "pool eval predictions have {} rows, train set has {}",
                    eval.len(),
                    split.y_train.len()
                ),
            });
        }

        let eval_folds = split
            .cv_folds
            .iter()
            .map(|fold| {
                fold.iter()
                    .map(|&i| {
                        eval.get(i).copied().ok_or_else(|| SearchError::PredictionShape {
                            message: format!("fold row {i} has no pool prediction"),
                        })
                    })
                    .collect()
            })
            .collect::<SearchResult<Vec<Vec<f64>>>>()?;

        self.members = Some(pool.len() as u64);
        Ok(CvOutput::new(eval_folds, vec![test]))
    }

    fn num_rounds(&self) -> Option<u64> {
        self.members
    }
}
