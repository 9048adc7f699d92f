//! # Loghouse Storage
//!
//! On-disk layout and durable state for a loghouse dataset:
//!
//! - **Layout** ([`layout`]): path conventions for partitions, index files,
//!   the manifest, and scratch space, all rooted at one directory.
//! - **Manifest** ([`manifest`]): the atomically published snapshot that
//!   defines which partition files exist for readers.
//! - **Registry** ([`registry`]): the `file_map.json` mapping stable file
//!   ids to source log paths, with checksums for change detection.
//! - **Retriever** ([`retriever`]): exact raw-line retrieval by record key
//!   through the offset index.
//!
//! All published state follows a write-to-temp-then-rename discipline so a
//! crashed writer never leaves readers with a torn manifest or index.

pub mod error;
pub mod layout;
pub mod manifest;
pub mod registry;
pub mod retriever;

pub use error::{StorageError, StorageResult};
pub use layout::DatasetLayout;
pub use manifest::{IngestSummary, Manifest, PartitionEntry};
pub use registry::{FileRegistry, RegisterOutcome};
pub use retriever::{RawRecordHit, RawRecordRetriever};
