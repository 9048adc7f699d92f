//! Ingest error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Core(#[from] loghouse_core::Error),

    #[error(transparent)]
    Storage(#[from] loghouse_storage::StorageError),

    #[error("ingest already in progress (lock held by pid {pid} since {acquired_at})")]
    IngestInProgress { pid: u32, acquired_at: String },

    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("batch schema does not match declared {kind} schema: {details}")]
    SchemaViolation { kind: String, details: String },
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
