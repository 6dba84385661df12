use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("invalid active-clusters filter {0:?}: expected <int><m|h|d>")]
    InvalidActiveFilter(String),
    #[error("telemetry handler request failed: {0}")]
    Telemetry(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DispatcherResult<T> = Result<T, DispatcherError>;
