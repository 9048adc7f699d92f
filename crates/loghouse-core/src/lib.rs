//! LogHouse Core Types
//!
//! This crate defines the data model shared by the ingest pipeline, the
//! storage layer, and the query service:
//!
//! - [`NormalizedEvent`]: the tagged variant produced by the normalizer,
//!   one of slow query, authentication, or connection lifecycle
//! - [`RawSpan`]: the exact byte range of an event's original log line
//! - [`OffsetIndexEntry`]: one offset-index row per normalized event
//! - [`EventKind`]: the three event families and their on-disk names
//! - Arrow schemas and batch builders for each event kind ([`schema`])
//! - Deterministic record-key derivation ([`key`])
//! - Runtime settings ([`Settings`])
//!
//! ## Design Decisions
//!
//! - Events are a sum type with exhaustive matching downstream, never
//!   runtime field probing
//! - A `RawSpan` identifies source bytes by `{file_id, offset, length}` and
//!   never copies the payload
//! - Record keys are content-derived (SHA-256 over normalized structure) so
//!   structurally identical events hash identically across re-ingests

pub mod error;
pub mod event;
pub mod key;
pub mod schema;
pub mod settings;

pub use error::{Error, Result};
pub use event::{
    AuthEvent, ConnectionEvent, EventKind, NormalizedEvent, OffsetIndexEntry, RawSpan,
    SlowQueryEvent,
};
pub use settings::{CompressionCodec, Settings};

/// Schema version written into every manifest. Bump when any declared
/// Arrow schema changes shape.
pub const SCHEMA_VERSION: u32 = 1;
