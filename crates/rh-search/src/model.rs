//! Model contract and the solution registry.

use rh_types::{DataSplit, DatasetDescriptor, Level, SearchError, SearchResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::pool::EnsemblePool;
use crate::preprocess::FeatureContext;

/// What a cross-validated fit hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CvOutput {
    /// The model rejected this round against the envelope's threshold.
    pub outlier: bool,
    /// Out-of-fold predictions, one vector per cv fold in fold order.
    pub eval_folds: Vec<Vec<f64>>,
    /// Holdout predictions, one vector per fold or per pool member.
    pub test_folds: Vec<Vec<f64>>,
}

impl CvOutput {
    pub fn outlier() -> Self {
        Self {
            outlier: true,
            ..Self::default()
        }
    }

    pub fn new(eval_folds: Vec<Vec<f64>>, test_folds: Vec<Vec<f64>>) -> Self {
        Self {
            outlier: false,
            eval_folds,
            test_folds,
        }
    }
}

/// A model instance built for one round.
///
/// Fitting runs on a blocking thread, so implementations only need `Send`.
pub trait SearchModel: Send {
    fn class_name(&self) -> &str;

    /// Cross-validate a level-1 model on the split.
    fn cv(&mut self, split: &DataSplit, threshold: f64) -> SearchResult<CvOutput>;

    /// Cross-validate a level-2 model on the pool of earlier rounds.
    fn cv_pool(
        &mut self,
        pool: &EnsemblePool,
        split: &DataSplit,
        threshold: f64,
    ) -> SearchResult<CvOutput>;

    /// Boosting rounds actually used, known after fitting.
    fn num_rounds(&self) -> Option<u64> {
        None
    }

    fn save_importance(&self, _dataset_folder: &Path) -> SearchResult<()> {
        Ok(())
    }

    fn save_predict(
        &self,
        _dataset_folder: &Path,
        _eval: &[f64],
        _test: &[f64],
    ) -> SearchResult<()> {
        Ok(())
    }
}

/// Everything a factory may use to build a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec<'a> {
    pub dataset: &'a DatasetDescriptor,
    pub context: &'a FeatureContext,
    pub params: &'a Map<String, Value>,
    pub round_id: u64,
}

/// Builds models of one family.
pub trait ModelFactory: Send + Sync {
    /// Family name recorded on every round, e.g. `"LightGBM"`.
    fn model_name(&self) -> &str;

    fn level(&self) -> Level;

    fn build(&self, spec: ModelSpec<'_>) -> SearchResult<Box<dyn SearchModel>>;
}

/// Solution identifier to factory.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    factories: BTreeMap<String, Arc<dyn ModelFactory>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("solutions", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one under `solution`.
    pub fn register(
        &mut self,
        solution: impl Into<String>,
        factory: Arc<dyn ModelFactory>,
    ) -> &mut Self {
        let solution = solution.into();
        info!(solution = %solution, model = factory.model_name(), "model registered");
        self.factories.insert(solution, factory);
        self
    }

    pub fn with(mut self, solution: impl Into<String>, factory: Arc<dyn ModelFactory>) -> Self {
        self.register(solution, factory);
        self
    }

    pub fn contains(&self, solution: &str) -> bool {
        self.factories.contains_key(solution)
    }

    pub fn solutions(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn resolve(&self, solution: &str) -> SearchResult<Arc<dyn ModelFactory>> {
        self.factories
            .get(solution)
            .cloned()
            .ok_or_else(|| SearchError::UnknownSolution {
                solution: solution.to_string(),
            })
    }

    /// Fail on the first identifier that has no factory.
    pub fn require<S: AsRef<str>>(&self, solutions: &[S]) -> SearchResult<()> {
        for solution in solutions {
            self.resolve(solution.as_ref())?;
        }
        Ok(())
    }
}
