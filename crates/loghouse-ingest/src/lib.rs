//! # Loghouse Ingest
//!
//! The write path: turn raw database log files into published columnar
//! partitions and offset index entries.
//!
//! - **Normalizer** ([`normalizer`]): line-by-line JSON log parsing into
//!   typed events, tracking byte spans for later raw retrieval.
//! - **Chunking** ([`chunk`]): per-kind row buffers with row and byte
//!   flush thresholds.
//! - **Columnar writer** ([`columnar`]): Parquet partition files staged in
//!   scratch space and renamed into place.
//! - **Offset index** ([`offsets`]): per-kind index of record keys to raw
//!   byte spans, merged and republished atomically at finalize.
//! - **Lock** ([`lock`]): single-writer guarantee per dataset, with stale
//!   lock recovery.
//! - **Coordinator** ([`coordinator`]): drives a whole ingest run and owns
//!   the commit/abort protocol.
//!
//! Ingest is deliberately synchronous. One run owns the dataset lock, so
//! there is nothing to overlap with, and blocking I/O keeps the commit
//! protocol easy to reason about. The query side is where concurrency
//! lives.

pub mod chunk;
pub mod columnar;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod normalizer;
pub mod offsets;

pub use coordinator::{IngestCoordinator, IngestReport};
pub use error::{IngestError, IngestResult};
pub use normalizer::{LineOutcome, Normalizer, NormalizerStats};
