//! Core error types.
//!
//! All fallible core operations return `Result<T>` aliased to
//! `Result<T, Error>`, which allows clean propagation with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("Event kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },
}
