//! Execution of one search round.
//!
//! A round goes through preprocessing (level 1 only), pool building (level 2
//! only), a cross-validated fit, artifact saving, plotting and scoring, and
//! ends with its record pushed on the results queue and appended to the
//! dataset's ledger. Any error aborts the round and reaches the caller; an
//! outlier verdict from the model ends it early without persisting anything.

use chrono::Utc;
use rh_store::{DataLayout, JobQueue, PredictionStore, RoundLedger, StoreHandle};
use rh_types::{
    finite, DataSplit, DatasetDescriptor, DispatchedJob, Level, RoundRecord, Score, SearchError,
    SearchResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::DatasetCatalog;
use crate::graph::{Grapher, NoopGrapher, PlotPart};
use crate::metrics::{cv_summary, MetricEvaluator, StandardMetrics};
use crate::model::{CvOutput, ModelRegistry, ModelSpec, SearchModel};
use crate::pool::{EnsemblePool, EnsemblePoolBuilder};
use crate::preprocess::{FeatureContext, PassthroughPreprocessor, Preprocessor, ProcessInput};

/// How a round ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Completed(Box<RoundRecord>),
    /// The model rejected the round; nothing was published.
    Outlier { dataset_id: String, round_id: u64 },
}

/// Put concatenated out-of-fold predictions back into train row order:
/// `out[i_eval[k]] = concat[k]`.
pub fn reindex_eval(eval_folds: &[Vec<f64>], i_eval: &[usize]) -> SearchResult<Vec<f64>> {
    let concat: Vec<f64> = eval_folds.iter().flatten().copied().collect();
    if concat.len() != i_eval.len() {
        return Err(SearchError::PredictionShape {
            message: format!(
                "{} out-of-fold predictions for {} eval rows",
                concat.len(),
                i_eval.len()
            ),
        });
    }

    let mut out = vec![f64::NAN; concat.len()];
    for (value, &row) in concat.into_iter().zip(i_eval) {
        let slot = out.get_mut(row).ok_or_else(|| SearchError::PredictionShape {
            message: format!("eval row {row} out of range"),
        })?;
        *slot = value;
    }
    Ok(out)
}

/// Element-wise mean of the per-fold holdout predictions.
pub fn average_test_folds(test_folds: &[Vec<f64>]) -> SearchResult<Vec<f64>> {
    let Some(first) = test_folds.first() else {
        return Err(SearchError::PredictionShape {
            message: "model returned no test predictions".to_string(),
        });
    };
    let len = first.len();
    if let Some(bad) = test_folds.iter().find(|f| f.len() != len) {
        return Err(SearchError::PredictionShape {
            message: format!("test folds of {} and {} rows", len, bad.len()),
        });
    }

    let n = test_folds.len() as f64;
    Ok((0..len)
        .map(|i| test_folds.iter().map(|fold| fold[i]).sum::<f64>() / n)
        .collect())
}

#[derive(Debug, Clone)]
pub struct SearchExecutor {
    catalog: Arc<dyn DatasetCatalog>,
    registry: Arc<ModelRegistry>,
    preprocessor: Arc<dyn Preprocessor>,
    metrics: Arc<dyn MetricEvaluator>,
    grapher: Arc<dyn Grapher>,
    layout: DataLayout,
    predictions: PredictionStore,
    pool_builder: EnsemblePoolBuilder,
    ledger: RoundLedger,
    queue: JobQueue,
}

struct Scores {
    eval: Score,
    test: Score,
    cv: Vec<Score>,
    eval_other: BTreeMap<String, Score>,
    test_other: BTreeMap<String, Score>,
}

impl SearchExecutor {
    pub fn new(
        store: StoreHandle,
        layout: DataLayout,
        registry: Arc<ModelRegistry>,
        catalog: Arc<dyn DatasetCatalog>,
    ) -> Self {
        let ledger = RoundLedger::new(Arc::clone(&store));
        let predictions = PredictionStore::new(layout.clone());
        Self {
            catalog,
            registry,
            preprocessor: Arc::new(PassthroughPreprocessor),
            metrics: Arc::new(StandardMetrics),
            grapher: Arc::new(NoopGrapher),
            pool_builder: EnsemblePoolBuilder::new(ledger.clone(), predictions.clone()),
            layout,
            predictions,
            ledger,
            queue: JobQueue::new(store),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricEvaluator>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_grapher(mut self, grapher: Arc<dyn Grapher>) -> Self {
        self.grapher = grapher;
        self
    }

    pub fn with_results_queue(mut self, name: impl Into<String>) -> Self {
        self.queue = self.queue.with_results_queue(name);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub async fn execute(&self, job: DispatchedJob) -> SearchResult<RoundOutcome> {
        let envelope = &job.envelope;
        envelope.validate()?;
        let dataset_id = envelope.dataset_id.as_str();
        let round_id = envelope.round_id;

        let dataset = self.catalog.descriptor(dataset_id).await?;
        let mut split = self.catalog.split(dataset_id).await?;
        let mut context = FeatureContext::from_descriptor(&dataset);

        let (process_steps, duration_process) = match envelope.level {
            Level::Base => {
                let started = Instant::now();
                let input = ProcessInput {
                    x_train: std::mem::take(&mut split.x_train),
                    y_train: std::mem::take(&mut split.y_train),
                    x_test: std::mem::take(&mut split.x_test),
                    y_test: std::mem::take(&mut split.y_test),
                };
                let (processed, output) = self.preprocessor.process(context, input)?;
                context = processed;
                split.x_train = output.x_train;
                split.x_test = output.x_test;
                split.set_targets(output.y_train, output.y_test);
                split.validate(dataset_id)?;
                (context.process_steps().to_vec(), started.elapsed().as_secs())
            }
            Level::Ensemble => (Vec::new(), 0),
        };

        let factory = self.registry.resolve(&envelope.solution)?;
        if factory.level() != envelope.level {
            return Err(SearchError::InvalidEnvelope {
                message: format!(
                    "solution {} is a level {} model, round {} asks for level {}",
                    envelope.solution,
                    factory.level(),
                    round_id,
                    envelope.level
                ),
            });
        }
        let model = factory.build(ModelSpec {
            dataset: &dataset,
            context: &context,
            params: &envelope.model_params,
            round_id,
        })?;

        let pool = match envelope.level {
            Level::Base => None,
            Level::Ensemble => {
                let depth = envelope.depth();
                let pool = self
                    .pool_builder
                    .build(dataset_id, depth, dataset.metric.direction)
                    .await?;
                if pool.is_empty() {
                    return Err(SearchError::InsufficientBaseModels {
                        dataset_id: dataset_id.to_string(),
                        depth,
                    });
                }
                Some(pool)
            }
        };

        let started = Instant::now();
        let split = Arc::new(split);
        let (model, output) = fit(model, pool, Arc::clone(&split), envelope.threshold).await?;

        if output.outlier {
            info!(
                dataset = dataset_id,
                round = round_id,
                solution = %envelope.solution,
                threshold = envelope.threshold,
                "outlier round skipped"
            );
            return Ok(RoundOutcome::Outlier {
                dataset_id: dataset_id.to_string(),
                round_id,
            });
        }

        let eval = reindex_eval(&output.eval_folds, &split.i_eval)?;
        let test = average_test_folds(&output.test_folds)?;

        self.predictions.save(dataset_id, round_id, &eval, &test).await?;
        let dataset_folder = self.layout.dataset_folder(dataset_id);
        model.save_importance(&dataset_folder)?;
        model.save_predict(&dataset_folder, &eval, &test)?;

        self.plot(dataset_id, round_id, &split, &eval, &test);
        let duration_model = started.elapsed().as_secs();

        let scores = self.score(&dataset, &split, &output, &eval, &test)?;
        let (cv_mean, cv_std, cv_max) = cv_summary(&scores.cv);

        let record = RoundRecord {
            model_name: factory.model_name().to_string(),
            model_class: model.class_name().to_string(),
            process_steps,
            duration_process,
            num_rounds: model.num_rounds(),
            duration_model,
            score_eval: scores.eval,
            score_test: scores.test,
            scores_cv: scores.cv,
            cv_mean,
            cv_std,
            cv_max,
            eval_other_metrics: scores.eval_other,
            test_other_metrics: scores.test_other,
            completed_at: Utc::now(),
            job,
        };

        self.queue.publish_result(&record).await?;
        // Published rounds count as completed even when the ledger write fails.
        if let Err(e) = self.ledger.append(&record).await {
            error!(
                dataset = record.dataset_id(),
                round = round_id,
                error = %e,
                "round published but not added to the ledger"
            );
        }

        info!(
            dataset = record.dataset_id(),
            round = record.round_id(),
            solution = record.solution(),
            model = %record.model_name,
            score_eval = ?record.score_eval,
            duration_model = record.duration_model,
            "round completed"
        );
        Ok(RoundOutcome::Completed(Box::new(record)))
    }

    fn plot(&self, dataset_id: &str, round_id: u64, split: &DataSplit, eval: &[f64], test: &[f64]) {
        for (part, y_true, y_pred) in [
            (PlotPart::Eval, split.y_train.as_slice(), eval),
            (PlotPart::Test, split.y_test.as_slice(), test),
        ] {
            if let Err(e) = self.grapher.predict(dataset_id, round_id, part, y_true, y_pred) {
                warn!(
                    dataset = dataset_id,
                    round = round_id,
                    part = part.as_str(),
                    error = %e,
                    "prediction plot failed"
                );
            }
            if let Err(e) = self.grapher.histogram(dataset_id, round_id, part, y_true, y_pred) {
                warn!(
                    dataset = dataset_id,
                    round = round_id,
                    part = part.as_str(),
                    error = %e,
                    "histogram failed"
                );
            }
        }
    }

    fn score(
        &self,
        dataset: &DatasetDescriptor,
        split: &DataSplit,
        output: &CvOutput,
        eval: &[f64],
        test: &[f64],
    ) -> SearchResult<Scores> {
        let metric = dataset.metric.name.as_str();
        let evaluate = |name: &str, y_true: &[f64], y_pred: &[f64]| -> SearchResult<Score> {
            Ok(finite(self.metrics.evaluate(name, y_true, y_pred)?))
        };

        if output.eval_folds.len() != split.y_eval_list.len() {
            return Err(SearchError::PredictionShape {
                message: format!(
                    "{} eval folds for {} cv folds",
                    output.eval_folds.len(),
                    split.y_eval_list.len()
                ),
            });
        }
        let cv = split
            .y_eval_list
            .iter()
            .zip(&output.eval_folds)
            .map(|(y_true, y_pred)| evaluate(metric, y_true.as_slice(), y_pred.as_slice()))
            .collect::<SearchResult<Vec<_>>>()?;

        let mut eval_other = BTreeMap::new();
        let mut test_other = BTreeMap::new();
        for name in &dataset.other_metrics {
            eval_other.insert(name.clone(), evaluate(name, split.y_train.as_slice(), eval)?);
            test_other.insert(name.clone(), evaluate(name, split.y_test.as_slice(), test)?);
        }

        let scores = Scores {
            eval: evaluate(metric, split.y_train.as_slice(), eval)?,
            test: evaluate(metric, split.y_test.as_slice(), test)?,
            cv,
            eval_other,
            test_other,
        };
        debug!(
            dataset = %dataset.dataset_id,
            metric,
            eval = ?scores.eval,
            test = ?scores.test,
            "round scored"
        );
        Ok(scores)
    }
}

/// Run the model's cross-validation on a blocking thread. A panicking model
/// resumes unwinding in the calling task.
async fn fit(
    mut model: Box<dyn SearchModel>,
    pool: Option<EnsemblePool>,
    split: Arc<DataSplit>,
    threshold: f64,
) -> SearchResult<(Box<dyn SearchModel>, CvOutput)> {
    let handle = tokio::task::spawn_blocking(move || {
        let output = match &pool {
            Some(pool) => model.cv_pool(pool, &split, threshold),
            None => model.cv(&split, threshold),
        };
        (model, output)
    });

    match handle.await {
        Ok((model, output)) => Ok((model, output?)),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(SearchError::collaborator("cv", e)),
    }
}
