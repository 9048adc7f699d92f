//! Raw Record Retrieval
//!
//! Given a record key, find its occurrences in the offset index and read
//! the exact original log lines back from the registered source files.
//! Plain files are read through a memory map; gzip sources are streamed
//! and skipped to the recorded offset. A source whose on-disk size no
//! longer matches its registry entry is treated as rotated and never
//! read. When a span cannot be read, the indexed sample text is returned
//! instead, flagged so callers can tell an exact line from a fallback;
//! occurrences with no sample are dropped with a warning.

use std::io::Read;
use std::path::{Path, PathBuf};

use arrow::array::{Array, Int64Array, StringArray, UInt32Array, UInt64Array};
use loghouse_core::event::RawSpan;
use loghouse_core::EventKind;
use memmap2::Mmap;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::{StorageError, StorageResult};
use crate::layout::DatasetLayout;
use crate::registry::FileRegistry;

/// One retrieved occurrence of a record key.
#[derive(Debug, Clone)]
pub struct RawRecordHit {
    pub kind: EventKind,
    pub record_key: String,
    pub timestamp: String,
    pub ts_epoch: i64,
    pub line_number: u64,
    /// Registered path of the source file the span points into.
    pub source_path: String,
    /// The original log line, exact bytes, when the source is readable.
    pub raw_line: Option<String>,
    /// Indexed sample text, present for kinds that carry one.
    pub sample: Option<String>,
    /// True when `raw_line` is absent and `sample` stands in for it.
    pub from_sample: bool,
}

pub struct RawRecordRetriever {
    layout: DatasetLayout,
}

impl RawRecordRetriever {
    pub fn new(layout: DatasetLayout) -> Self {
        RawRecordRetriever { layout }
    }

    /// Fetch up to `limit` occurrences of `record_key`, newest first.
    /// `kind` narrows the search to one index file; `None` scans all.
    pub fn fetch(
        &self,
        record_key: &str,
        kind: Option<EventKind>,
        limit: usize,
    ) -> StorageResult<Vec<RawRecordHit>> {
        let kinds: Vec<EventKind> = match kind {
            Some(k) => vec![k],
            None => EventKind::ALL.to_vec(),
        };

        let mut matches: Vec<IndexMatch> = Vec::new();
        for kind in kinds {
            let path = self.layout.offsets_path(kind);
            if !path.exists() {
                continue;
            }
            scan_offsets_file(&path, kind, record_key, &mut matches)?;
        }

        // Newest occurrences first, then stable by line for ties.
        matches.sort_by(|a, b| b.ts_epoch.cmp(&a.ts_epoch).then(b.line_number.cmp(&a.line_number)));
        matches.truncate(limit);

        let registry = FileRegistry::load(&self.layout)?;
        let mut hits = Vec::with_capacity(matches.len());
        for m in matches {
            let entry = registry
                .resolve(m.span.file_id)
                .ok_or(StorageError::UnknownFileId(m.span.file_id))?;
            let source_path = entry.path.clone();
            let read = verify_source_size(Path::new(&source_path), entry.bytes)
                .and_then(|_| read_span(Path::new(&source_path), m.span));
            let (raw_line, from_sample) = match read {
                Ok(bytes) => (Some(String::from_utf8_lossy(&bytes).into_owned()), false),
                Err(e) if m.sample.is_some() => {
                    tracing::warn!(
                        record_key = %m.record_key,
                        source = %source_path,
                        error = %e,
                        "source unreadable, falling back to indexed sample"
                    );
                    (None, true)
                }
                Err(e) => {
                    tracing::warn!(
                        record_key = %m.record_key,
                        source = %source_path,
                        error = %e,
                        "source unreadable and no indexed sample, dropping occurrence"
                    );
                    continue;
                }
            };
            hits.push(RawRecordHit {
                kind: m.kind,
                record_key: m.record_key,
                timestamp: m.timestamp,
                ts_epoch: m.ts_epoch,
                line_number: m.line_number,
                source_path,
                raw_line,
                sample: m.sample,
                from_sample,
            });
        }
        Ok(hits)
    }
}

struct IndexMatch {
    kind: EventKind,
    record_key: String,
    timestamp: String,
    ts_epoch: i64,
    span: RawSpan,
    line_number: u64,
    sample: Option<String>,
}

fn scan_offsets_file(
    path: &Path,
    kind: EventKind,
    record_key: &str,
    out: &mut Vec<IndexMatch>,
) -> StorageResult<()> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    for batch in reader {
        let batch = batch?;
        let keys = column::<StringArray>(&batch, "record_key")?;
        let timestamps = column::<StringArray>(&batch, "timestamp")?;
        let ts_epochs = column::<Int64Array>(&batch, "ts_epoch")?;
        let file_ids = column::<UInt32Array>(&batch, "file_id")?;
        let offsets = column::<UInt64Array>(&batch, "byte_offset")?;
        let lengths = column::<UInt32Array>(&batch, "byte_length")?;
        let lines = column::<UInt64Array>(&batch, "line_number")?;
        let samples = column::<StringArray>(&batch, "sample")?;

        for row in 0..batch.num_rows() {
            if keys.value(row) != record_key {
                continue;
            }
            out.push(IndexMatch {
                kind,
                record_key: record_key.to_string(),
                timestamp: timestamps.value(row).to_string(),
                ts_epoch: ts_epochs.value(row),
                span: RawSpan {
                    file_id: file_ids.value(row),
                    byte_offset: offsets.value(row),
                    byte_length: lengths.value(row),
                },
                line_number: lines.value(row),
                sample: if samples.is_null(row) {
                    None
                } else {
                    Some(samples.value(row).to_string())
                },
            });
        }
    }
    Ok(())
}

fn column<'a, T: 'static>(
    batch: &'a arrow::record_batch::RecordBatch,
    name: &str,
) -> StorageResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            StorageError::from(arrow::error::ArrowError::SchemaError(format!(
                "offset index missing column {}",
                name
            )))
        })
}

/// Reject a source whose current size differs from the size recorded at
/// registration; its byte offsets no longer describe these contents.
fn verify_source_size(path: &Path, registered_bytes: u64) -> StorageResult<()> {
    let current = std::fs::metadata(path)
        .map_err(|e| StorageError::SourceUnavailable {
            path: PathBuf::from(path),
            reason: e.to_string(),
        })?
        .len();
    if current != registered_bytes {
        return Err(StorageError::SourceUnavailable {
            path: PathBuf::from(path),
            reason: format!(
                "size changed since registration ({} bytes now, {} registered)",
                current, registered_bytes
            ),
        });
    }
    Ok(())
}

/// Read one span's bytes out of a source file.
fn read_span(path: &Path, span: RawSpan) -> StorageResult<Vec<u8>> {
    if !path.exists() {
        return Err(StorageError::SourceUnavailable {
            path: PathBuf::from(path),
            reason: "file not found".to_string(),
        });
    }
    if path.extension().is_some_and(|ext| ext == "gz") {
        read_span_gzip(path, span)
    } else {
        read_span_mmap(path, span)
    }
}

fn read_span_mmap(path: &Path, span: RawSpan) -> StorageResult<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    // Safety: the mapping is read-only and dropped before return.
    let map = unsafe { Mmap::map(&file)? };
    let start = span.byte_offset as usize;
    let end = start + span.byte_length as usize;
    if end > map.len() {
        return Err(StorageError::SpanOutOfBounds {
            offset: span.byte_offset,
            length: span.byte_length,
            file_size: map.len() as u64,
        });
    }
    Ok(map[start..end].to_vec())
}

/// Offsets recorded for gzip sources are into the *decompressed* stream,
/// so the reader skips forward through the decoder.
fn read_span_gzip(path: &Path, span: RawSpan) -> StorageResult<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut decoder = flate2::read::GzDecoder::new(std::io::BufReader::new(file));
    let skipped = std::io::copy(
        &mut decoder.by_ref().take(span.byte_offset),
        &mut std::io::sink(),
    )?;
    if skipped < span.byte_offset {
        return Err(StorageError::SpanOutOfBounds {
            offset: span.byte_offset,
            length: span.byte_length,
            file_size: skipped,
        });
    }
    let mut buf = vec![0u8; span.byte_length as usize];
    decoder.read_exact(&mut buf).map_err(|_| StorageError::SpanOutOfBounds {
        offset: span.byte_offset,
        length: span.byte_length,
        file_size: span.byte_offset,
    })?;
    Ok(buf)
}
