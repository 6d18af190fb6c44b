//! Scoring contract and the built-in metrics.

use rh_types::{Score, SearchError, SearchResult};

pub trait MetricEvaluator: Send + Sync + std::fmt::Debug {
    fn evaluate(&self, metric: &str, y_true: &[f64], y_pred: &[f64]) -> SearchResult<f64>;
}

/// `rmse`, `mse`, `mae`, `r2` and `accuracy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMetrics;

impl MetricEvaluator for StandardMetrics {
    fn evaluate(&self, metric: &str, y_true: &[f64], y_pred: &[f64]) -> SearchResult<f64> {
        if y_true.len() != y_pred.len() {
            return Err(SearchError::PredictionShape {
                message: format!(
                    "{metric}: {} targets for {} predictions",
                    y_true.len(),
                    y_pred.len()
                ),
            });
        }
        if y_true.is_empty() {
            return Ok(f64::NAN);
        }

        let n = y_true.len() as f64;
        let pairs = || y_true.iter().zip(y_pred);
        let mse = || pairs().map(|(t, p)| (t - p).powi(2)).sum::<f64>() / n;

        let value = match metric {
            "mse" => mse(),
            "rmse" => mse().sqrt(),
            "mae" => pairs().map(|(t, p)| (t - p).abs()).sum::<f64>() / n,
            "r2" => {
                let mean = y_true.iter().sum::<f64>() / n;
                let total: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
                let residual: f64 = pairs().map(|(t, p)| (t - p).powi(2)).sum();
                1.0 - residual / total
            }
            "accuracy" => pairs().filter(|(t, p)| p.round() == **t).count() as f64 / n,
            other => {
                return Err(SearchError::collaborator(
                    "scoring",
                    format!("unknown metric {other}"),
                ))
            }
        };
        Ok(value)
    }
}

/// Mean, population standard deviation and max of the finite fold scores.
pub fn cv_summary(scores: &[Score]) -> (Score, Score, Score) {
    let values: Vec<f64> = scores.iter().flatten().copied().collect();
    if values.is_empty() {
        return (None, None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (Some(mean), Some(variance.sqrt()), Some(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn regression_metrics() {
        let m = StandardMetrics;
        let y = [1.0, 2.0, 3.0, 4.0];
        let p = [1.0, 2.0, 3.0, 6.0];
        assert!(close(m.evaluate("mse", &y, &p).unwrap(), 1.0));
        assert!(close(m.evaluate("rmse", &y, &p).unwrap(), 1.0));
        assert!(close(m.evaluate("mae", &y, &p).unwrap(), 0.5));
        assert!(close(m.evaluate("r2", &y, &p).unwrap(), 1.0 - 4.0 / 5.0));
        assert!(close(m.evaluate("accuracy", &[1.0, 0.0], &[0.9, 0.8]).unwrap(), 0.5));
    }

    #[test]
    fn bad_inputs() {
        let m = StandardMetrics;
        assert!(matches!(
            m.evaluate("rmse", &[1.0], &[1.0, 2.0]),
            Err(SearchError::PredictionShape { .. })
        ));
        assert!(matches!(
            m.evaluate("logloss", &[1.0], &[1.0]),
            Err(SearchError::Collaborator { .. })
        ));
        // Constant targets leave r2 undefined.
        assert!(m.evaluate("r2", &[2.0, 2.0], &[1.0, 3.0]).unwrap().is_infinite());
    }

    #[test]
    fn cv_summary_uses_population_std() {
        let (mean, std, max) = cv_summary(&[Some(1.0), None, Some(3.0)]);
        assert_eq!(mean, Some(2.0));
        assert_eq!(std, Some(1.0));
        assert_eq!(max, Some(3.0));
        assert_eq!(cv_summary(&[None]), (None, None, None));
    }
}
