//! Dataset descriptors and cached splits.

use async_trait::async_trait;
use rh_store::DataLayout;
use rh_types::{DataSplit, DatasetDescriptor, SearchError, SearchResult, StoreError};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

/// Source of dataset metadata and train/holdout splits.
#[async_trait]
pub trait DatasetCatalog: Send + Sync + std::fmt::Debug {
    async fn descriptor(&self, dataset_id: &str) -> SearchResult<DatasetDescriptor>;

    /// The cached split. Implementations return it validated.
    async fn split(&self, dataset_id: &str) -> SearchResult<DataSplit>;
}

/// Catalog reading JSON documents from the data folder.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    layout: DataLayout,
}

impl FileCatalog {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        dataset_id: &str,
        path: &Path,
    ) -> SearchResult<T> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SearchError::DatasetNotFound {
                    dataset_id: dataset_id.to_string(),
                });
            }
            Err(e) => return Err(StoreError::from(e).into()),
        };
        debug!(dataset = dataset_id, path = %path.display(), "catalog read");
        serde_json::from_slice(&bytes).map_err(|e| {
            SearchError::collaborator("catalog", format!("{}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl DatasetCatalog for FileCatalog {
    async fn descriptor(&self, dataset_id: &str) -> SearchResult<DatasetDescriptor> {
        self.read_json(dataset_id, &self.layout.descriptor_path(dataset_id))
            .await
    }

    async fn split(&self, dataset_id: &str) -> SearchResult<DataSplit> {
        let split: DataSplit = self
            .read_json(dataset_id, &self.layout.split_path(dataset_id))
            .await?;
        split.validate(dataset_id)?;
        Ok(split)
    }
}
