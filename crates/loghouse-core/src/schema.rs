//! Arrow Schemas and Batch Construction
//!
//! Each event kind has a fixed Arrow schema that every partition file of
//! that kind must carry. The offset index has its own schema shared by all
//! kinds. Batch builders convert normalized events into `RecordBatch`es
//! column by column; a kind mismatch in the input slice is an error rather
//! than a silent skip.

use std::sync::Arc;

use arrow::array::{Int64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::error::{Error, Result};
use crate::event::{EventKind, NormalizedEvent, OffsetIndexEntry};

/// Schema for slow-query partition files.
pub fn slow_query_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Utf8, false),
        Field::new("ts_epoch", DataType::Int64, false),
        Field::new("duration_ms", DataType::Int64, false),
        Field::new("docs_examined", DataType::Int64, false),
        Field::new("docs_returned", DataType::Int64, false),
        Field::new("keys_examined", DataType::Int64, false),
        Field::new("record_key", DataType::Utf8, false),
        Field::new("database", DataType::Utf8, false),
        Field::new("collection", DataType::Utf8, false),
        Field::new("namespace", DataType::Utf8, false),
        Field::new("plan_summary", DataType::Utf8, false),
        Field::new("query_text", DataType::Utf8, false),
        Field::new("operation", DataType::Utf8, false),
        Field::new("connection_id", DataType::Utf8, true),
        Field::new("username", DataType::Utf8, true),
        Field::new("file_id", DataType::UInt32, false),
        Field::new("byte_offset", DataType::UInt64, false),
        Field::new("byte_length", DataType::UInt32, false),
        Field::new("line_number", DataType::UInt64, false),
    ]))
}

/// Schema for authentication partition files.
pub fn auth_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Utf8, false),
        Field::new("ts_epoch", DataType::Int64, false),
        Field::new("record_key", DataType::Utf8, false),
        Field::new("user", DataType::Utf8, true),
        Field::new("database", DataType::Utf8, true),
        Field::new("mechanism", DataType::Utf8, true),
        Field::new("result", DataType::Utf8, false),
        Field::new("connection_id", DataType::Utf8, true),
        Field::new("remote_address", DataType::Utf8, true),
        Field::new("app_name", DataType::Utf8, true),
        Field::new("error", DataType::Utf8, true),
        Field::new("file_id", DataType::UInt32, false),
        Field::new("byte_offset", DataType::UInt64, false),
        Field::new("byte_length", DataType::UInt32, false),
        Field::new("line_number", DataType::UInt64, false),
    ]))
}

/// Schema for connection lifecycle partition files.
pub fn connection_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Utf8, false),
        Field::new("ts_epoch", DataType::Int64, false),
        Field::new("record_key", DataType::Utf8, false),
        Field::new("event", DataType::Utf8, false),
        Field::new("connection_id", DataType::Utf8, true),
        Field::new("remote_address", DataType::Utf8, true),
        Field::new("connection_count", DataType::Int64, true),
        Field::new("app_name", DataType::Utf8, true),
        Field::new("driver", DataType::Utf8, true),
        Field::new("file_id", DataType::UInt32, false),
        Field::new("byte_offset", DataType::UInt64, false),
        Field::new("byte_length", DataType::UInt32, false),
        Field::new("line_number", DataType::UInt64, false),
    ]))
}

/// Schema for the per-kind offset index files.
pub fn offsets_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("record_key", DataType::Utf8, false),
        Field::new("timestamp", DataType::Utf8, false),
        Field::new("ts_epoch", DataType::Int64, false),
        Field::new("file_id", DataType::UInt32, false),
        Field::new("byte_offset", DataType::UInt64, false),
        Field::new("byte_length", DataType::UInt32, false),
        Field::new("line_number", DataType::UInt64, false),
        Field::new("sample", DataType::Utf8, true),
    ]))
}

/// The partition schema for a given event kind.
pub fn schema_for(kind: EventKind) -> SchemaRef {
    match kind {
        EventKind::SlowQuery => slow_query_schema(),
        EventKind::Auth => auth_schema(),
        EventKind::Connection => connection_schema(),
    }
}

/// Build a partition batch from events that must all match `kind`.
pub fn build_event_batch(kind: EventKind, events: &[NormalizedEvent]) -> Result<RecordBatch> {
    for event in events {
        if event.kind() != kind {
            return Err(Error::KindMismatch {
                expected: kind.dir_name().to_string(),
                actual: event.kind().dir_name().to_string(),
            });
        }
    }
    match kind {
        EventKind::SlowQuery => build_slow_query_batch(events),
        EventKind::Auth => build_auth_batch(events),
        EventKind::Connection => build_connection_batch(events),
    }
}

fn build_slow_query_batch(events: &[NormalizedEvent]) -> Result<RecordBatch> {
    let rows: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            NormalizedEvent::SlowQuery(q) => Some(q),
            _ => None,
        })
        .collect();

    let timestamps: Vec<&str> = rows.iter().map(|r| r.timestamp.as_str()).collect();
    let ts_epochs: Vec<i64> = rows.iter().map(|r| r.ts_epoch).collect();
    let durations: Vec<i64> = rows.iter().map(|r| r.duration_ms).collect();
    let examined: Vec<i64> = rows.iter().map(|r| r.docs_examined).collect();
    let returned: Vec<i64> = rows.iter().map(|r| r.docs_returned).collect();
    let keys: Vec<i64> = rows.iter().map(|r| r.keys_examined).collect();
    let record_keys: Vec<&str> = rows.iter().map(|r| r.record_key.as_str()).collect();
    let databases: Vec<&str> = rows.iter().map(|r| r.database.as_str()).collect();
    let collections: Vec<&str> = rows.iter().map(|r| r.collection.as_str()).collect();
    let namespaces: Vec<&str> = rows.iter().map(|r| r.namespace.as_str()).collect();
    let plans: Vec<&str> = rows.iter().map(|r| r.plan_summary.as_str()).collect();
    let queries: Vec<&str> = rows.iter().map(|r| r.query_text.as_str()).collect();
    let operations: Vec<&str> = rows.iter().map(|r| r.operation.as_str()).collect();
    let conn_ids: Vec<Option<&str>> = rows.iter().map(|r| r.connection_id.as_deref()).collect();
    let usernames: Vec<Option<&str>> = rows.iter().map(|r| r.username.as_deref()).collect();
    let file_ids: Vec<u32> = rows.iter().map(|r| r.span.file_id).collect();
    let offsets: Vec<u64> = rows.iter().map(|r| r.span.byte_offset).collect();
    let lengths: Vec<u32> = rows.iter().map(|r| r.span.byte_length).collect();
    let lines: Vec<u64> = rows.iter().map(|r| r.line_number).collect();

    let batch = RecordBatch::try_new(
        slow_query_schema(),
        vec![
            Arc::new(StringArray::from(timestamps)),
            Arc::new(Int64Array::from(ts_epochs)),
            Arc::new(Int64Array::from(durations)),
            Arc::new(Int64Array::from(examined)),
            Arc::new(Int64Array::from(returned)),
            Arc::new(Int64Array::from(keys)),
            Arc::new(StringArray::from(record_keys)),
            Arc::new(StringArray::from(databases)),
            Arc::new(StringArray::from(collections)),
            Arc::new(StringArray::from(namespaces)),
            Arc::new(StringArray::from(plans)),
            Arc::new(StringArray::from(queries)),
            Arc::new(StringArray::from(operations)),
            Arc::new(StringArray::from(conn_ids)),
            Arc::new(StringArray::from(usernames)),
            Arc::new(UInt32Array::from(file_ids)),
            Arc::new(UInt64Array::from(offsets)),
            Arc::new(UInt32Array::from(lengths)),
            Arc::new(UInt64Array::from(lines)),
        ],
    )?;
    Ok(batch)
}

fn build_auth_batch(events: &[NormalizedEvent]) -> Result<RecordBatch> {
    let rows: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            NormalizedEvent::Auth(a) => Some(a),
            _ => None,
        })
        .collect();

    let timestamps: Vec<&str> = rows.iter().map(|r| r.timestamp.as_str()).collect();
    let ts_epochs: Vec<i64> = rows.iter().map(|r| r.ts_epoch).collect();
    let record_keys: Vec<&str> = rows.iter().map(|r| r.record_key.as_str()).collect();
    let users: Vec<Option<&str>> = rows.iter().map(|r| r.user.as_deref()).collect();
    let databases: Vec<Option<&str>> = rows.iter().map(|r| r.database.as_deref()).collect();
    let mechanisms: Vec<Option<&str>> = rows.iter().map(|r| r.mechanism.as_deref()).collect();
    let results: Vec<&str> = rows.iter().map(|r| r.result.as_str()).collect();
    let conn_ids: Vec<Option<&str>> = rows.iter().map(|r| r.connection_id.as_deref()).collect();
    let remotes: Vec<Option<&str>> = rows.iter().map(|r| r.remote_address.as_deref()).collect();
    let apps: Vec<Option<&str>> = rows.iter().map(|r| r.app_name.as_deref()).collect();
    let errors: Vec<Option<&str>> = rows.iter().map(|r| r.error.as_deref()).collect();
    let file_ids: Vec<u32> = rows.iter().map(|r| r.span.file_id).collect();
    let offsets: Vec<u64> = rows.iter().map(|r| r.span.byte_offset).collect();
    let lengths: Vec<u32> = rows.iter().map(|r| r.span.byte_length).collect();
    let lines: Vec<u64> = rows.iter().map(|r| r.line_number).collect();

    let batch = RecordBatch::try_new(
        auth_schema(),
        vec![
            Arc::new(StringArray::from(timestamps)),
            Arc::new(Int64Array::from(ts_epochs)),
            Arc::new(StringArray::from(record_keys)),
            Arc::new(StringArray::from(users)),
            Arc::new(StringArray::from(databases)),
            Arc::new(StringArray::from(mechanisms)),
            Arc::new(StringArray::from(results)),
            Arc::new(StringArray::from(conn_ids)),
            Arc::new(StringArray::from(remotes)),
            Arc::new(StringArray::from(apps)),
            Arc::new(StringArray::from(errors)),
            Arc::new(UInt32Array::from(file_ids)),
            Arc::new(UInt64Array::from(offsets)),
            Arc::new(UInt32Array::from(lengths)),
            Arc::new(UInt64Array::from(lines)),
        ],
    )?;
    Ok(batch)
}

fn build_connection_batch(events: &[NormalizedEvent]) -> Result<RecordBatch> {
    let rows: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            NormalizedEvent::Connection(c) => Some(c),
            _ => None,
        })
        .collect();

    let timestamps: Vec<&str> = rows.iter().map(|r| r.timestamp.as_str()).collect();
    let ts_epochs: Vec<i64> = rows.iter().map(|r| r.ts_epoch).collect();
    let record_keys: Vec<&str> = rows.iter().map(|r| r.record_key.as_str()).collect();
    let states: Vec<&str> = rows.iter().map(|r| r.event.as_str()).collect();
    let conn_ids: Vec<Option<&str>> = rows.iter().map(|r| r.connection_id.as_deref()).collect();
    let remotes: Vec<Option<&str>> = rows.iter().map(|r| r.remote_address.as_deref()).collect();
    let counts: Vec<Option<i64>> = rows.iter().map(|r| r.connection_count).collect();
    let apps: Vec<Option<&str>> = rows.iter().map(|r| r.app_name.as_deref()).collect();
    let drivers: Vec<Option<&str>> = rows.iter().map(|r| r.driver.as_deref()).collect();
    let file_ids: Vec<u32> = rows.iter().map(|r| r.span.file_id).collect();
    let offsets: Vec<u64> = rows.iter().map(|r| r.span.byte_offset).collect();
    let lengths: Vec<u32> = rows.iter().map(|r| r.span.byte_length).collect();
    let lines: Vec<u64> = rows.iter().map(|r| r.line_number).collect();

    let batch = RecordBatch::try_new(
        connection_schema(),
        vec![
            Arc::new(StringArray::from(timestamps)),
            Arc::new(Int64Array::from(ts_epochs)),
            Arc::new(StringArray::from(record_keys)),
            Arc::new(StringArray::from(states)),
            Arc::new(StringArray::from(conn_ids)),
            Arc::new(StringArray::from(remotes)),
            Arc::new(Int64Array::from(counts)),
            Arc::new(StringArray::from(apps)),
            Arc::new(StringArray::from(drivers)),
            Arc::new(UInt32Array::from(file_ids)),
            Arc::new(UInt64Array::from(offsets)),
            Arc::new(UInt32Array::from(lengths)),
            Arc::new(UInt64Array::from(lines)),
        ],
    )?;
    Ok(batch)
}

/// Build an offset index batch from index entries (any kind).
pub fn build_offsets_batch(entries: &[OffsetIndexEntry]) -> Result<RecordBatch> {
    let record_keys: Vec<&str> = entries.iter().map(|e| e.record_key.as_str()).collect();
    let timestamps: Vec<&str> = entries.iter().map(|e| e.timestamp.as_str()).collect();
    let ts_epochs: Vec<i64> = entries.iter().map(|e| e.ts_epoch).collect();
    let file_ids: Vec<u32> = entries.iter().map(|e| e.span.file_id).collect();
    let offsets: Vec<u64> = entries.iter().map(|e| e.span.byte_offset).collect();
    let lengths: Vec<u32> = entries.iter().map(|e| e.span.byte_length).collect();
    let lines: Vec<u64> = entries.iter().map(|e| e.line_number).collect();
    let samples: Vec<Option<&str>> = entries.iter().map(|e| e.sample.as_deref()).collect();

    let batch = RecordBatch::try_new(
        offsets_schema(),
        vec![
            Arc::new(StringArray::from(record_keys)),
            Arc::new(StringArray::from(timestamps)),
            Arc::new(Int64Array::from(ts_epochs)),
            Arc::new(UInt32Array::from(file_ids)),
            Arc::new(UInt64Array::from(offsets)),
            Arc::new(UInt32Array::from(lengths)),
            Arc::new(UInt64Array::from(lines)),
            Arc::new(StringArray::from(samples)),
        ],
    )?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuthEvent, RawSpan, SlowQueryEvent};
    use arrow::array::Array;

    fn span() -> RawSpan {
        RawSpan {
            file_id: 1,
            byte_offset: 0,
            byte_length: 100,
        }
    }

    fn slow_query(key: &str) -> NormalizedEvent {
        NormalizedEvent::SlowQuery(SlowQueryEvent {
            timestamp: "2026-01-02T03:04:05.000+00:00".to_string(),
            ts_epoch: 1_767_323_045,
            duration_ms: 150,
            docs_examined: 1000,
            docs_returned: 10,
            keys_examined: 100,
            record_key: key.to_string(),
            database: "db".to_string(),
            collection: "coll".to_string(),
            namespace: "db.coll".to_string(),
            plan_summary: "COLLSCAN".to_string(),
            query_text: "{}".to_string(),
            operation: "find".to_string(),
            connection_id: None,
            username: None,
            span: span(),
            line_number: 1,
        })
    }

    fn auth(key: &str) -> NormalizedEvent {
        NormalizedEvent::Auth(AuthEvent {
            timestamp: "2026-01-02T03:04:05.000+00:00".to_string(),
            ts_epoch: 1_767_323_045,
            record_key: key.to_string(),
            user: Some("alice".to_string()),
            database: Some("admin".to_string()),
            mechanism: None,
            result: "failure".to_string(),
            connection_id: None,
            remote_address: Some("10.0.0.1:5000".to_string()),
            app_name: None,
            error: Some("AuthenticationFailed".to_string()),
            span: span(),
            line_number: 2,
        })
    }

    #[test]
    fn test_slow_query_batch_shape() {
        let events = vec![slow_query("a"), slow_query("b")];
        let batch = build_event_batch(EventKind::SlowQuery, &events).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), slow_query_schema());
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let events = vec![slow_query("a"), auth("b")];
        let err = build_event_batch(EventKind::SlowQuery, &events).unwrap_err();
        assert!(matches!(err, Error::KindMismatch { .. }));
    }

    #[test]
    fn test_auth_batch_nullable_columns() {
        let events = vec![auth("a")];
        let batch = build_event_batch(EventKind::Auth, &events).unwrap();
        assert_eq!(batch.num_rows(), 1);
        let mechanisms = batch
            .column_by_name("mechanism")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(mechanisms.is_null(0));
    }

    #[test]
    fn test_offsets_batch() {
        let entry = OffsetIndexEntry::from_event(&slow_query("k1"));
        let batch = build_offsets_batch(&[entry]).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema(), offsets_schema());
    }

    #[test]
    fn test_empty_batch_allowed() {
        let batch = build_event_batch(EventKind::Connection, &[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
    }
}
