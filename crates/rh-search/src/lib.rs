//! # rh-search
//!
//! Execution of hyperparameter-search rounds: the collaborator contracts
//! (dataset catalog, preprocessing, models, metrics, plots), the solution
//! registry, ensemble pool selection and the round executor.

mod baseline;
mod catalog;
mod executor;
mod graph;
mod metrics;
mod model;
mod pool;
mod preprocess;

#[cfg(test)]
mod testing;

pub use baseline::{
    register_baselines, EnsembleMeanFactory, EnsembleMeanModel, MeanFactory, MeanModel,
    ENSEMBLE_MEAN, MEAN,
};
pub use catalog::{DatasetCatalog, FileCatalog};
pub use executor::{average_test_folds, reindex_eval, RoundOutcome, SearchExecutor};
pub use graph::{Grapher, NoopGrapher, PlotPart};
pub use metrics::{cv_summary, MetricEvaluator, StandardMetrics};
pub use model::{CvOutput, ModelFactory, ModelRegistry, ModelSpec, SearchModel};
pub use pool::{select_rounds, EnsemblePool, EnsemblePoolBuilder, PoolEntry};
pub use preprocess::{FeatureContext, PassthroughPreprocessor, Preprocessor, ProcessInput};
