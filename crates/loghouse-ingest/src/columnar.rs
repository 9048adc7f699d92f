//! Partition File Writer
//!
//! Serializes event chunks to Parquet. Files are written fully into the
//! run's scratch directory first; `finalize` renames them into their day
//! directories in one pass, after which only the manifest publish makes
//! them visible to readers. Chunk sequence numbers continue after any
//! files already present in a day directory, so re-ingests never clobber
//! published partitions.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use arrow::record_batch::RecordBatch;
use chrono::{DateTime, TimeZone, Utc};
use loghouse_core::event::{EventKind, NormalizedEvent};
use loghouse_core::schema;
use loghouse_core::settings::CompressionCodec;
use loghouse_storage::layout::DatasetLayout;
use loghouse_storage::manifest::PartitionEntry;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::error::{IngestError, IngestResult};

struct StagedPartition {
    tmp_path: PathBuf,
    final_path: PathBuf,
    entry: PartitionEntry,
}

/// Writes one kind's partition files for one ingest run.
pub struct PartitionWriter {
    layout: DatasetLayout,
    ingest_id: String,
    kind: EventKind,
    compression: Compression,
    staged: Vec<StagedPartition>,
    /// Next chunk sequence per day directory, seeded from disk.
    next_seq: BTreeMap<PathBuf, u32>,
}

impl PartitionWriter {
    pub fn new(
        layout: DatasetLayout,
        ingest_id: &str,
        kind: EventKind,
        codec: CompressionCodec,
    ) -> Self {
        let compression = match codec {
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
            CompressionCodec::None => Compression::UNCOMPRESSED,
        };
        PartitionWriter {
            layout,
            ingest_id: ingest_id.to_string(),
            kind,
            compression,
            staged: Vec::new(),
            next_seq: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn staged_chunks(&self) -> usize {
        self.staged.len()
    }

    /// Serialize one chunk of events into a staged partition file.
    pub fn write_chunk(&mut self, events: &[NormalizedEvent]) -> IngestResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let min_ts = events.iter().map(NormalizedEvent::ts_epoch).min().unwrap_or(0);
        let max_ts = events.iter().map(NormalizedEvent::ts_epoch).max().unwrap_or(0);
        let batch = schema::build_event_batch(self.kind, events)?;
        self.write_batch(batch, min_ts, max_ts)
    }

    /// Serialize a prebuilt batch. The batch schema must match the
    /// declared schema for this writer's kind.
    pub fn write_batch(
        &mut self,
        batch: RecordBatch,
        min_ts: i64,
        max_ts: i64,
    ) -> IngestResult<()> {
        let declared = schema::schema_for(self.kind);
        if batch.schema() != declared {
            return Err(IngestError::SchemaViolation {
                kind: self.kind.dir_name().to_string(),
                details: format!(
                    "got fields [{}], want fields [{}]",
                    field_names(&batch.schema()),
                    field_names(&declared)
                ),
            });
        }

        let day = partition_day(min_ts);
        let day_dir = self.layout.partition_dir(self.kind, day);
        let seq = self.reserve_seq(&day_dir)?;
        let rel_path = DatasetLayout::relative_partition_path(self.kind, day, seq);
        let final_path = self.layout.resolve(&rel_path);

        // Encode in memory so the CRC covers exactly what lands on disk
        let mut encoded: Vec<u8> = Vec::new();
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();
        let mut writer = ArrowWriter::try_new(&mut encoded, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&encoded);
        let crc32 = hasher.finalize();

        let tmp_dir = self.layout.tmp_dir(&self.ingest_id);
        std::fs::create_dir_all(&tmp_dir)?;
        let tmp_path = tmp_dir.join(format!("{}_{}", self.kind.dir_name(), DatasetLayout::chunk_file_name(seq)));
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }

        tracing::debug!(
            kind = %self.kind,
            path = %rel_path,
            rows = batch.num_rows(),
            bytes = encoded.len(),
            "staged partition chunk"
        );

        self.staged.push(StagedPartition {
            tmp_path,
            final_path,
            entry: PartitionEntry {
                kind: self.kind.dir_name().to_string(),
                path: rel_path,
                rows: batch.num_rows() as u64,
                bytes: encoded.len() as u64,
                min_ts,
                max_ts,
                crc32,
            },
        });
        Ok(())
    }

    /// Move all staged files into their day directories and return their
    /// manifest entries. Files renamed here stay invisible to readers
    /// until the manifest that names them is published.
    pub fn finalize(self) -> IngestResult<Vec<PartitionEntry>> {
        let mut entries = Vec::with_capacity(self.staged.len());
        for staged in self.staged {
            if let Some(parent) = staged.final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&staged.tmp_path, &staged.final_path)?;
            entries.push(staged.entry);
        }
        Ok(entries)
    }

    /// Destination paths of staged chunks, for abort cleanup after a
    /// partially completed finalize.
    pub fn staged_final_paths(&self) -> Vec<PathBuf> {
        self.staged.iter().map(|s| s.final_path.clone()).collect()
    }

    fn reserve_seq(&mut self, day_dir: &PathBuf) -> IngestResult<u32> {
        if let Some(seq) = self.next_seq.get_mut(day_dir) {
            let reserved = *seq;
            *seq += 1;
            return Ok(reserved);
        }
        let start = existing_max_seq(day_dir)?.map_or(0, |max| max + 1);
        self.next_seq.insert(day_dir.clone(), start + 1);
        Ok(start)
    }
}

fn field_names(schema: &arrow::datatypes::SchemaRef) -> String {
    schema
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Day (UTC midnight) a chunk belongs to, from its minimum epoch.
fn partition_day(ts_epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts_epoch, 0).single().unwrap_or_else(|| {
        Utc.timestamp_opt(0, 0).single().unwrap_or_default()
    })
}

/// Highest existing chunk sequence in a day directory, if any.
fn existing_max_seq(day_dir: &PathBuf) -> IngestResult<Option<u32>> {
    let entries = match std::fs::read_dir(day_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut max: Option<u32> = None;
    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(seq) = name
            .strip_prefix("chunk_")
            .and_then(|rest| rest.strip_suffix(".parquet"))
            .and_then(|digits| digits.parse::<u32>().ok())
        {
            max = Some(max.map_or(seq, |m| m.max(seq)));
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_core::event::{ConnectionEvent, RawSpan};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn connection(ts_epoch: i64) -> NormalizedEvent {
        NormalizedEvent::Connection(ConnectionEvent {
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            ts_epoch,
            record_key: "k".to_string(),
            event: "accepted".to_string(),
            connection_id: None,
            remote_address: Some("10.0.0.1:5000".to_string()),
            connection_count: Some(1),
            app_name: None,
            driver: None,
            span: RawSpan {
                file_id: 1,
                byte_offset: 0,
                byte_length: 80,
            },
            line_number: 1,
        })
    }

    // 2026-01-01T00:00:00Z
    const DAY_EPOCH: i64 = 1_767_225_600;

    #[test]
    fn test_write_and_finalize_partition() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.ensure_layout().unwrap();

        let mut writer = PartitionWriter::new(
            layout.clone(),
            "ing-1",
            EventKind::Connection,
            CompressionCodec::Snappy,
        );
        writer
            .write_chunk(&[connection(DAY_EPOCH), connection(DAY_EPOCH + 60)])
            .unwrap();
        assert_eq!(writer.staged_chunks(), 1);

        let entries = writer.finalize().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.rows, 2);
        assert_eq!(entry.min_ts, DAY_EPOCH);
        assert_eq!(entry.max_ts, DAY_EPOCH + 60);
        assert!(entry.path.starts_with("connections/2026/01/01/"));

        let file = std::fs::File::open(layout.resolve(&entry.path)).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_sequence_continues_after_existing_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.ensure_layout().unwrap();

        let mut first = PartitionWriter::new(
            layout.clone(),
            "ing-1",
            EventKind::Connection,
            CompressionCodec::None,
        );
        first.write_chunk(&[connection(DAY_EPOCH)]).unwrap();
        first.finalize().unwrap();

        let mut second = PartitionWriter::new(
            layout.clone(),
            "ing-2",
            EventKind::Connection,
            CompressionCodec::None,
        );
        second.write_chunk(&[connection(DAY_EPOCH)]).unwrap();
        second.write_chunk(&[connection(DAY_EPOCH)]).unwrap();
        let entries = second.finalize().unwrap();
        assert_eq!(entries[0].path, "connections/2026/01/01/chunk_00001.parquet");
        assert_eq!(entries[1].path, "connections/2026/01/01/chunk_00002.parquet");
    }

    #[test]
    fn test_schema_violation_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.ensure_layout().unwrap();

        let mut writer = PartitionWriter::new(
            layout,
            "ing-1",
            EventKind::SlowQuery,
            CompressionCodec::None,
        );
        // Connection-shaped batch offered to the slow-query writer
        let batch =
            schema::build_event_batch(EventKind::Connection, &[connection(DAY_EPOCH)]).unwrap();
        let err = writer.write_batch(batch, DAY_EPOCH, DAY_EPOCH).unwrap_err();
        assert!(matches!(err, IngestError::SchemaViolation { .. }));
    }

    #[test]
    fn test_staged_files_stay_in_scratch_until_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.ensure_layout().unwrap();

        let mut writer = PartitionWriter::new(
            layout.clone(),
            "ing-1",
            EventKind::Connection,
            CompressionCodec::None,
        );
        writer.write_chunk(&[connection(DAY_EPOCH)]).unwrap();
        let final_path = writer.staged_final_paths()[0].clone();
        assert!(!final_path.exists());
        assert!(layout.tmp_dir("ing-1").is_dir());

        writer.finalize().unwrap();
        assert!(final_path.exists());
    }
}
