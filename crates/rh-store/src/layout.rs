//! On-disk layout of the data folder.
//!
//! ```text
//! <root>/store/                      file backend keys
//! <root>/<dataset>/dataset.json      descriptor
//! <root>/<dataset>/data/eval_set.json
//! <root>/<dataset>/predict/<round>_{eval,test}.csv
//! <root>/<dataset>/errors.txt
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_folder(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn dataset_folder(&self, dataset_id: &str) -> PathBuf {
        self.root.join(dataset_id)
    }

    pub fn descriptor_path(&self, dataset_id: &str) -> PathBuf {
        self.dataset_folder(dataset_id).join("dataset.json")
    }

    pub fn split_path(&self, dataset_id: &str) -> PathBuf {
        self.dataset_folder(dataset_id).join("data").join("eval_set.json")
    }

    pub fn predict_folder(&self, dataset_id: &str) -> PathBuf {
        self.dataset_folder(dataset_id).join("predict")
    }

    pub fn error_log_path(&self, dataset_id: &str) -> PathBuf {
        self.dataset_folder(dataset_id).join("errors.txt")
    }
}
