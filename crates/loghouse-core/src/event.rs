//! Normalized Event Model
//!
//! A [`NormalizedEvent`] is the fundamental unit of data in LogHouse: one
//! typed record derived from one raw log line. Each variant carries:
//!
//! - **timestamp / ts_epoch**: the event time as parsed from the line
//! - **record_key**: deterministic, content-derived identifier (see [`crate::key`])
//! - **span**: a [`RawSpan`] locating the original bytes in the source file
//! - **line_number**: 1-based line number in the source file
//! - kind-specific fields (query metrics, auth outcome, connection state)
//!
//! ## Ownership
//!
//! Events are created by the normalizer, owned exclusively by a chunk buffer
//! until flushed, and moved (not cloned) into the columnar writer. The span
//! is a small copyable value; the raw payload is never duplicated.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exact location of a record's original bytes within a registered source
/// file. Immutable once written; never contains the payload itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSpan {
    /// Stable id of the source file in the file registry
    pub file_id: u32,

    /// Byte offset of the line start within the source file
    pub byte_offset: u64,

    /// Length of the line in bytes, including the trailing newline
    pub byte_length: u32,
}

/// The three event families LogHouse extracts from MongoDB logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SlowQuery,
    Auth,
    Connection,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::SlowQuery, EventKind::Auth, EventKind::Connection];

    /// Directory name under the dataset root holding this kind's partitions.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EventKind::SlowQuery => "slow_queries",
            EventKind::Auth => "authentications",
            EventKind::Connection => "connections",
        }
    }

    /// File name of this kind's offset index under `index/`.
    pub fn offsets_file_name(&self) -> String {
        format!("{}_offsets.parquet", self.dir_name())
    }

    pub fn from_dir_name(name: &str) -> Result<Self> {
        match name {
            "slow_queries" => Ok(EventKind::SlowQuery),
            "authentications" => Ok(EventKind::Auth),
            "connections" => Ok(EventKind::Connection),
            other => Err(Error::UnknownEventKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Normalized slow-query execution event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryEvent {
    pub timestamp: String,
    pub ts_epoch: i64,
    pub duration_ms: i64,
    pub docs_examined: i64,
    pub docs_returned: i64,
    pub keys_examined: i64,
    pub record_key: String,
    pub database: String,
    pub collection: String,
    pub namespace: String,
    pub plan_summary: String,
    pub query_text: String,
    pub operation: String,
    pub connection_id: Option<String>,
    pub username: Option<String>,
    pub span: RawSpan,
    pub line_number: u64,
}

/// Normalized authentication audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub timestamp: String,
    pub ts_epoch: i64,
    pub record_key: String,
    pub user: Option<String>,
    pub database: Option<String>,
    pub mechanism: Option<String>,
    /// "success" or "failure"
    pub result: String,
    pub connection_id: Option<String>,
    pub remote_address: Option<String>,
    pub app_name: Option<String>,
    pub error: Option<String>,
    pub span: RawSpan,
    pub line_number: u64,
}

/// Normalized connection lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub timestamp: String,
    pub ts_epoch: i64,
    pub record_key: String,
    /// "accepted" or "ended"
    pub event: String,
    pub connection_id: Option<String>,
    pub remote_address: Option<String>,
    pub connection_count: Option<i64>,
    pub app_name: Option<String>,
    pub driver: Option<String>,
    pub span: RawSpan,
    pub line_number: u64,
}

/// Tagged variant over the three event families. Writers and the query
/// service match exhaustively on this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedEvent {
    SlowQuery(SlowQueryEvent),
    Auth(AuthEvent),
    Connection(ConnectionEvent),
}

impl NormalizedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NormalizedEvent::SlowQuery(_) => EventKind::SlowQuery,
            NormalizedEvent::Auth(_) => EventKind::Auth,
            NormalizedEvent::Connection(_) => EventKind::Connection,
        }
    }

    pub fn ts_epoch(&self) -> i64 {
        match self {
            NormalizedEvent::SlowQuery(e) => e.ts_epoch,
            NormalizedEvent::Auth(e) => e.ts_epoch,
            NormalizedEvent::Connection(e) => e.ts_epoch,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            NormalizedEvent::SlowQuery(e) => &e.timestamp,
            NormalizedEvent::Auth(e) => &e.timestamp,
            NormalizedEvent::Connection(e) => &e.timestamp,
        }
    }

    pub fn record_key(&self) -> &str {
        match self {
            NormalizedEvent::SlowQuery(e) => &e.record_key,
            NormalizedEvent::Auth(e) => &e.record_key,
            NormalizedEvent::Connection(e) => &e.record_key,
        }
    }

    pub fn span(&self) -> RawSpan {
        match self {
            NormalizedEvent::SlowQuery(e) => e.span,
            NormalizedEvent::Auth(e) => e.span,
            NormalizedEvent::Connection(e) => e.span,
        }
    }

    pub fn line_number(&self) -> u64 {
        match self {
            NormalizedEvent::SlowQuery(e) => e.line_number,
            NormalizedEvent::Auth(e) => e.line_number,
            NormalizedEvent::Connection(e) => e.line_number,
        }
    }

    /// Best-effort sample text stored in the offset index as a fallback for
    /// when the source file is gone. Truncated; never a substitute for the
    /// raw bytes the span points at.
    pub fn sample_text(&self) -> Option<String> {
        const SAMPLE_MAX: usize = 256;
        match self {
            NormalizedEvent::SlowQuery(e) => {
                let mut text = e.query_text.clone();
                if text.len() > SAMPLE_MAX {
                    let mut cut = SAMPLE_MAX;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                }
                Some(text)
            }
            NormalizedEvent::Auth(_) | NormalizedEvent::Connection(_) => None,
        }
    }

    /// Estimate of this event's in-memory footprint, used by the chunk
    /// buffer's byte budget.
    pub fn estimated_size(&self) -> usize {
        fn opt_len(s: &Option<String>) -> usize {
            s.as_ref().map(|v| v.len()).unwrap_or(0)
        }
        let fixed = std::mem::size_of::<Self>();
        match self {
            NormalizedEvent::SlowQuery(e) => {
                fixed
                    + e.timestamp.len()
                    + e.record_key.len()
                    + e.database.len()
                    + e.collection.len()
                    + e.namespace.len()
                    + e.plan_summary.len()
                    + e.query_text.len()
                    + e.operation.len()
                    + opt_len(&e.connection_id)
                    + opt_len(&e.username)
            }
            NormalizedEvent::Auth(e) => {
                fixed
                    + e.timestamp.len()
                    + e.record_key.len()
                    + e.result.len()
                    + opt_len(&e.user)
                    + opt_len(&e.database)
                    + opt_len(&e.mechanism)
                    + opt_len(&e.connection_id)
                    + opt_len(&e.remote_address)
                    + opt_len(&e.app_name)
                    + opt_len(&e.error)
            }
            NormalizedEvent::Connection(e) => {
                fixed
                    + e.timestamp.len()
                    + e.record_key.len()
                    + e.event.len()
                    + opt_len(&e.connection_id)
                    + opt_len(&e.remote_address)
                    + opt_len(&e.app_name)
                    + opt_len(&e.driver)
            }
        }
    }
}

/// One offset-index row: maps a record key back to the exact byte range of
/// its original log line. Append-only; published alongside data partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetIndexEntry {
    pub record_key: String,
    pub timestamp: String,
    pub ts_epoch: i64,
    pub span: RawSpan,
    pub line_number: u64,
    /// Truncated ingest-time sample used only as a flagged fallback when the
    /// source file no longer resolves.
    pub sample: Option<String>,
}

impl OffsetIndexEntry {
    pub fn from_event(event: &NormalizedEvent) -> Self {
        Self {
            record_key: event.record_key().to_string(),
            timestamp: event.timestamp().to_string(),
            ts_epoch: event.ts_epoch(),
            span: event.span(),
            line_number: event.line_number(),
            sample: event.sample_text(),
        }
    }
}
