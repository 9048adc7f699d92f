//! Query error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("analytical engine unavailable, degraded mode")]
    DegradedMode,

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    #[error(transparent)]
    Storage(#[from] loghouse_storage::StorageError),

    #[error("unexpected result shape: {0}")]
    ResultShape(String),
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;
