//! Cached eval/test predictions of completed rounds.
//!
//! Each round leaves two single-column CSV files in the dataset's predict
//! folder. Level-2 rounds read them back to build their pool.

use csv::{ReaderBuilder, WriterBuilder};
use rh_types::{SearchError, SearchResult, StoreError, StoreResult};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::layout::DataLayout;

const COLUMN: &str = "prediction";

#[derive(Debug, Clone)]
pub struct PredictionStore {
    layout: DataLayout,
}

fn csv_error(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        message: format!("prediction file {}: {}", path.display(), e),
    }
}

fn encode(path: &Path, values: &[f64]) -> StoreResult<Vec<u8>> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record([COLUMN]).map_err(|e| csv_error(path, e))?;
    for value in values {
        writer
            .write_record([value.to_string()])
            .map_err(|e| csv_error(path, e))?;
    }
    writer.into_inner().map_err(|e| csv_error(path, e))
}

fn decode(path: &Path, bytes: &[u8]) -> StoreResult<Vec<f64>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let field = record.get(0).unwrap_or_default().trim();
        let value = field
            .parse::<f64>()
            .map_err(|_| csv_error(path, format!("line {}: not a number: {field:?}", line + 2)))?;
        values.push(value);
    }
    Ok(values)
}

impl PredictionStore {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    pub fn eval_path(&self, dataset_id: &str, round_id: u64) -> PathBuf {
        self.layout
            .predict_folder(dataset_id)
            .join(format!("{round_id}_eval.csv"))
    }

    pub fn test_path(&self, dataset_id: &str, round_id: u64) -> PathBuf {
        self.layout
            .predict_folder(dataset_id)
            .join(format!("{round_id}_test.csv"))
    }

    pub async fn save(
        &self,
        dataset_id: &str,
        round_id: u64,
        eval: &[f64],
        test: &[f64],
    ) -> StoreResult<()> {
        tokio::fs::create_dir_all(self.layout.predict_folder(dataset_id)).await?;
        for (path, values) in [
            (self.eval_path(dataset_id, round_id), eval),
            (self.test_path(dataset_id, round_id), test),
        ] {
            let bytes = encode(&path, values)?;
            tokio::fs::write(&path, bytes).await?;
        }
        debug!(
            dataset = dataset_id,
            round = round_id,
            eval_rows = eval.len(),
            test_rows = test.len(),
            "predictions saved"
        );
        Ok(())
    }

    pub async fn exists(&self, dataset_id: &str, round_id: u64) -> bool {
        let eval = tokio::fs::try_exists(self.eval_path(dataset_id, round_id)).await;
        let test = tokio::fs::try_exists(self.test_path(dataset_id, round_id)).await;
        matches!((eval, test), (Ok(true), Ok(true)))
    }

    /// Eval and test predictions of one round.
    pub async fn load(
        &self,
        dataset_id: &str,
        round_id: u64,
    ) -> SearchResult<(Vec<f64>, Vec<f64>)> {
        let mut loaded = Vec::with_capacity(2);
        for path in [
            self.eval_path(dataset_id, round_id),
            self.test_path(dataset_id, round_id),
        ] {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(SearchError::ArtifactMissing {
                        dataset_id: dataset_id.to_string(),
                        round_id,
                    });
                }
                Err(e) => return Err(StoreError::from(e).into()),
            };
            loaded.push(decode(&path, &bytes)?);
        }
        let test = loaded.pop().unwrap_or_default();
        let eval = loaded.pop().unwrap_or_default();
        Ok((eval, test))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = PredictionStore::new(DataLayout::new(dir.path()));

        assert!(!store.exists("D1", 3).await);
        store
            .save("D1", 3, &[0.1, 0.25, -3.5e-7], &[1.0, 2.0])
            .await
            .unwrap();
        assert!(store.exists("D1", 3).await);

        let (eval, test) = store.load("D1", 3).await.unwrap();
        assert_eq!(eval, vec![0.1, 0.25, -3.5e-7]);
        assert_eq!(test, vec![1.0, 2.0]);

        let text = std::fs::read_to_string(store.eval_path("D1", 3)).unwrap();
        assert!(text.starts_with("prediction\n"));
    }

    #[tokio::test]
    async fn missing_round_is_attributable() {
        let dir = tempdir().unwrap();
        let store = PredictionStore::new(DataLayout::new(dir.path()));

        let err = store.load("D1", 42).await.unwrap_err();
        assert!(matches!(
            err,
            SearchError::ArtifactMissing { round_id: 42, .. }
        ));
    }

    #[tokio::test]
    async fn garbage_file_is_a_backend_error() {
        let dir = tempdir().unwrap();
        let store = PredictionStore::new(DataLayout::new(dir.path()));
        store.save("D1", 1, &[1.0], &[1.0]).await.unwrap();
        std::fs::write(store.test_path("D1", 1), "prediction\nabc\n").unwrap();

        let err = store.load("D1", 1).await.unwrap_err();
        assert!(matches!(err, SearchError::Store(StoreError::Backend { .. })));
    }
}
