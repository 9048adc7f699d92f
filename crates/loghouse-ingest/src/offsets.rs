//! Offset Index Writer
//!
//! Maintains the per-kind `index/<kind>_offsets.parquet` file that maps
//! record keys to raw byte spans. Entries buffer in memory and seal into
//! Arrow batches on the same cadence as partition chunks; at finalize the
//! existing index file is merged with the new batches and republished by
//! atomic rename, so readers see either the old index or the complete new
//! one.

use arrow::record_batch::RecordBatch;
use loghouse_core::event::{EventKind, OffsetIndexEntry};
use loghouse_core::schema;
use loghouse_core::settings::CompressionCodec;
use loghouse_storage::layout::DatasetLayout;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::error::IngestResult;

pub struct OffsetIndexWriter {
    layout: DatasetLayout,
    ingest_id: String,
    kind: EventKind,
    compression: Compression,
    buffer: Vec<OffsetIndexEntry>,
    sealed: Vec<RecordBatch>,
}

impl OffsetIndexWriter {
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
        OffsetIndexWriter {
            layout,
            ingest_id: ingest_id.to_string(),
            kind,
            compression,
            buffer: Vec::new(),
            sealed: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: OffsetIndexEntry) {
        self.buffer.push(entry);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Seal buffered entries into a batch. Called when the corresponding
    /// partition chunk flushes, keeping index batches the same size as
    /// data chunks.
    pub fn seal_batch(&mut self) -> IngestResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.buffer);
        self.sealed.push(schema::build_offsets_batch(&entries)?);
        Ok(())
    }

    /// Merge the existing index file with every new batch and republish.
    /// Returns the number of entries added.
    pub fn finalize(mut self) -> IngestResult<u64> {
        self.seal_batch()?;
        if self.sealed.is_empty() {
            return Ok(0);
        }
        let added: u64 = self.sealed.iter().map(|b| b.num_rows() as u64).sum();

        let index_path = self.layout.offsets_path(self.kind);
        let mut batches: Vec<RecordBatch> = Vec::new();
        if index_path.exists() {
            let file = std::fs::File::open(&index_path)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
            for batch in reader {
                batches.push(batch?);
            }
        }
        batches.extend(self.sealed);

        let tmp_dir = self.layout.tmp_dir(&self.ingest_id);
        std::fs::create_dir_all(&tmp_dir)?;
        let tmp_path = tmp_dir.join(self.kind.offsets_file_name());
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();
        {
            let file = std::fs::File::create(&tmp_path)?;
            let mut writer = ArrowWriter::try_new(file, schema::offsets_schema(), Some(props))?;
            for batch in &batches {
                writer.write(batch)?;
            }
            writer.close()?;
        }
        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&tmp_path, &index_path)?;

        tracing::debug!(kind = %self.kind, added, "offset index republished");
        Ok(added)
    }
}
