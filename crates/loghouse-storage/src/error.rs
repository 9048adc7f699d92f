//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
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

    #[error("manifest at {path} is corrupt: {reason}")]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("unknown file id {0} in offset index")]
    UnknownFileId(u32),

    #[error("source file {path} unavailable: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("record span out of bounds: offset {offset} + length {length} > file size {file_size}")]
    SpanOutOfBounds {
        offset: u64,
        length: u32,
        file_size: u64,
    },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
