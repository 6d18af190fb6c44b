use thiserror::Error;

/// Main error type for the Roundhouse system
#[derive(Error, Debug)]
pub enum RhError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Key-value store errors, shared by every backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {message}")]
    Backend { message: String },

    #[error("Store connection failed: {url}, error: {message}")]
    Connection { url: String, message: String },

    #[error("Key {key} does not hold a {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("Key {key} does not hold an integer counter")]
    NotANumber { key: String },

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while executing a search round
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Unknown solution: {solution}")]
    UnknownSolution { solution: String },

    #[error("Insufficient base models for dataset {dataset_id} at ensemble depth {depth}")]
    InsufficientBaseModels { dataset_id: String, depth: usize },

    #[error("Invalid job envelope: {message}")]
    InvalidEnvelope { message: String },

    #[error("Invalid data split for dataset {dataset_id}: {message}")]
    InvalidSplit { dataset_id: String, message: String },

    #[error("Prediction shape mismatch: {message}")]
    PredictionShape { message: String },

    #[error("Prediction artifact missing for dataset {dataset_id}, round {round_id}")]
    ArtifactMissing { dataset_id: String, round_id: u64 },

    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    #[error("{stage} failed: {message}")]
    Collaborator { stage: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SearchError {
    /// Wrap an error raised by an external collaborator (preprocessing,
    /// model fitting, scoring).
    pub fn collaborator(stage: &str, error: impl std::fmt::Display) -> Self {
        SearchError::Collaborator {
            stage: stage.to_string(),
            message: error.to_string(),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration value: {name}")]
    Missing { name: String },

    #[error("Invalid configuration value for {name}: {message}")]
    Invalid { name: String, message: String },

    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for Roundhouse operations
pub type RhResult<T> = Result<T, RhError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::RhError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($name:expr, $($arg:tt)*) => {
        $crate::ConfigError::Invalid {
            name: $name.to_string(),
            message: format!($($arg)*),
        }
    };
}
