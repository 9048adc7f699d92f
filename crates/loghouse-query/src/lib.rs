//! # Loghouse Query
//!
//! The read path: analytical SQL over published partition files.
//!
//! Every operation loads the manifest once, prunes partitions outside the
//! requested time range using their stored min/max timestamps, loads the
//! survivors into an in-memory table, and runs SQL through DataFusion in
//! a fresh session. Results are cached per dataset version; a new publish
//! invalidates the whole cache at once.
//!
//! With the engine disabled in settings, analytical operations fail
//! closed with [`error::QueryError::DegradedMode`]; raw record
//! retrieval does not go through the engine and stays available.

pub mod cache;
pub mod error;
pub mod service;
pub mod types;

pub use error::{QueryError, QueryResult};
pub use service::QueryService;
pub use types::{
    AggregateRow, AuthSummaryRow, ConnectionActivityRow, QueryFilters, SlowQueryGrouping,
    TrendPoint,
};
