//! Feature preprocessing contract.

use rh_types::{DatasetDescriptor, FeatureFrame, ProblemType, ProcessStep, SearchResult};

/// Column roles of a dataset plus the steps applied to its features so far.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureContext {
    pub problem_type: ProblemType,
    pub x_cols: Vec<String>,
    pub cat_cols: Vec<String>,
    pub text_cols: Vec<String>,
    pub missing_cols: Vec<String>,
    steps: Vec<ProcessStep>,
}

impl FeatureContext {
    pub fn from_descriptor(dataset: &DatasetDescriptor) -> Self {
        Self {
            problem_type: dataset.problem_type,
            x_cols: dataset.x_cols.clone(),
            cat_cols: dataset.cat_cols.clone(),
            text_cols: dataset.text_cols.clone(),
            missing_cols: dataset.missing_cols.clone(),
            steps: Vec::new(),
        }
    }

    pub fn record_step(&mut self, step: ProcessStep) {
        self.steps.push(step);
    }

    /// Applied steps in pipeline order.
    pub fn process_steps(&self) -> &[ProcessStep] {
        &self.steps
    }
}

/// Feature tables and targets going through preprocessing.
///
/// A pipeline may transform targets but must keep one per row; the executor
/// revalidates the split against its fold layout afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessInput {
    pub x_train: FeatureFrame,
    pub y_train: Vec<f64>,
    pub x_test: FeatureFrame,
    pub y_test: Vec<f64>,
}

/// Transforms the features and targets of a level-1 round.
pub trait Preprocessor: Send + Sync + std::fmt::Debug {
    fn process(
        &self,
        context: FeatureContext,
        input: ProcessInput,
    ) -> SearchResult<(FeatureContext, ProcessInput)>;
}

/// Hands features through untouched and records no steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPreprocessor;

impl Preprocessor for PassthroughPreprocessor {
    fn process(
        &self,
        context: FeatureContext,
        input: ProcessInput,
    ) -> SearchResult<(FeatureContext, ProcessInput)> {
        Ok((context, input))
    }
}
