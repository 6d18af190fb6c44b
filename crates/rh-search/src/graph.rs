//! Plotting contract. Plot failures never fail a round.

use rh_types::SearchResult;

/// Which predictions a plot shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotPart {
    Eval,
    Test,
}

impl PlotPart {
    pub fn as_str(self) -> &'static str {
        match self {
            PlotPart::Eval => "eval",
            PlotPart::Test => "test",
        }
    }
}

pub trait Grapher: Send + Sync + std::fmt::Debug {
    /// Predicted against actual values.
    fn predict(
        &self,
        dataset_id: &str,
        round_id: u64,
        part: PlotPart,
        y_true: &[f64],
        y_pred: &[f64],
    ) -> SearchResult<()>;

    /// Distribution of predictions and targets.
    fn histogram(
        &self,
        dataset_id: &str,
        round_id: u64,
        part: PlotPart,
        y_true: &[f64],
        y_pred: &[f64],
    ) -> SearchResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGrapher;

impl Grapher for NoopGrapher {
    fn predict(&self, _: &str, _: u64, _: PlotPart, _: &[f64], _: &[f64]) -> SearchResult<()> {
        Ok(())
    }

    fn histogram(&self, _: &str, _: u64, _: PlotPart, _: &[f64], _: &[f64]) -> SearchResult<()> {
        Ok(())
    }
}
