//! Ingest Coordination
//!
//! Drives a whole ingest run: lock, parse, flush, commit. The commit
//! order is fixed so a crash at any point leaves readers on the previous
//! manifest snapshot:
//!
//! 1. save the file registry (new ids are harmless if unreferenced)
//! 2. rename staged partition files into their day directories
//! 3. republish the offset index files, after copying the live ones
//!    aside
//! 4. publish the manifest (the commit point)
//!
//! Any failure before step 4 aborts: index files replaced in step 3 are
//! restored from the copies, partition files renamed this run are
//! deleted, and scratch space is removed, so the dataset reads exactly
//! as it did before the run started.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use loghouse_core::event::{EventKind, NormalizedEvent, OffsetIndexEntry};
use loghouse_core::settings::Settings;
use loghouse_storage::layout::DatasetLayout;
use loghouse_storage::manifest::{IngestSummary, Manifest, PartitionEntry};
use loghouse_storage::registry::FileRegistry;

use crate::chunk::{ChunkBuffer, FlushSignal};
use crate::columnar::PartitionWriter;
use crate::error::{IngestError, IngestResult};
use crate::lock::IngestLock;
use crate::normalizer::{LineOutcome, Normalizer, NormalizerStats};
use crate::offsets::OffsetIndexWriter;

/// Outcome of a successful ingest run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub ingest_id: String,
    /// Manifest version after publish.
    pub dataset_version: u64,
    pub rows_added: BTreeMap<String, u64>,
    pub lines: u64,
    pub parse_errors: u64,
    pub skipped: u64,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

impl IngestReport {
    pub fn total_rows(&self) -> u64 {
        self.rows_added.values().sum()
    }
}

pub struct IngestCoordinator {
    settings: Settings,
    layout: DatasetLayout,
}

/// Per-kind pipeline: buffer, partition writer, index writer.
struct KindPipeline {
    buffer: ChunkBuffer,
    partitions: PartitionWriter,
    offsets: OffsetIndexWriter,
}

impl IngestCoordinator {
    pub fn new(settings: Settings) -> Self {
        let layout = DatasetLayout::new(settings.out_root.clone());
        IngestCoordinator { settings, layout }
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// Ingest the given source log files into the dataset. A held lock
    /// rejects the run with `IngestInProgress` even when stale.
    pub fn run(&self, sources: &[PathBuf]) -> IngestResult<IngestReport> {
        self.run_with_override(sources, false)
    }

    /// Like [`run`](Self::run), but break the dataset lock first if its
    /// holder is dead or past the stale age. A live holder still rejects.
    pub fn run_with_override(
        &self,
        sources: &[PathBuf],
        override_stale_lock: bool,
    ) -> IngestResult<IngestReport> {
        for source in sources {
            if !source.exists() {
                return Err(IngestError::SourceMissing(source.clone()));
            }
        }
        self.layout.ensure_layout()?;
        let _lock = IngestLock::acquire(
            self.layout.lock_path(),
            self.settings.lock_stale_after_secs,
            override_stale_lock,
        )?;

        let ingest_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let started_at = Utc::now().to_rfc3339();
        tracing::info!(ingest_id = %ingest_id, sources = sources.len(), "ingest started");

        let mut published: Vec<PathBuf> = Vec::new();
        let mut index_backups: Vec<(PathBuf, PathBuf)> = Vec::new();
        let result = self.run_locked(
            &ingest_id,
            &started_at,
            started,
            sources,
            &mut published,
            &mut index_backups,
        );

        if result.is_err() {
            for (backup, live) in &index_backups {
                if let Err(e) = std::fs::copy(backup, live) {
                    tracing::warn!(
                        path = %live.display(),
                        error = %e,
                        "failed to restore offset index from backup"
                    );
                }
            }
            for path in published {
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        tracing::warn!(path = %path.display(), error = %e, "abort cleanup failed");
                    }
                }
            }
            tracing::warn!(ingest_id = %ingest_id, "ingest aborted, dataset unchanged");
        }
        let tmp_dir = self.layout.tmp_dir(&ingest_id);
        if tmp_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&tmp_dir) {
                tracing::warn!(error = %e, "failed to remove ingest scratch directory");
            }
        }
        result
    }

    fn run_locked(
        &self,
        ingest_id: &str,
        started_at: &str,
        started: Instant,
        sources: &[PathBuf],
        published: &mut Vec<PathBuf>,
        index_backups: &mut Vec<(PathBuf, PathBuf)>,
    ) -> IngestResult<IngestReport> {
        let mut manifest =
            Manifest::load(&self.layout, self.settings.parquet_compression.as_str())?;
        let mut registry = FileRegistry::load(&self.layout)?;

        let mut pipelines: Vec<KindPipeline> = EventKind::ALL
            .into_iter()
            .map(|kind| KindPipeline {
                buffer: ChunkBuffer::new(
                    kind,
                    self.settings.chunk_rows,
                    self.settings.chunk_bytes,
                ),
                partitions: PartitionWriter::new(
                    self.layout.clone(),
                    ingest_id,
                    kind,
                    self.settings.parquet_compression,
                ),
                offsets: OffsetIndexWriter::new(
                    self.layout.clone(),
                    ingest_id,
                    kind,
                    self.settings.parquet_compression,
                ),
            })
            .collect();

        let mut stats = NormalizerStats::default();
        let mut warnings: Vec<String> = Vec::new();

        for source in sources {
            let outcome = registry.register_source(source)?;
            if outcome.source_changed {
                warnings.push(format!(
                    "source {} changed since last registration; indexing under a new file id",
                    source.display()
                ));
            }
            if self.settings.keep_source_copy && !outcome.reused {
                self.copy_source(source)?;
            }
            self.parse_source(source, outcome.file_id, &mut pipelines, &mut stats)?;
        }

        // Final partial chunks
        for pipeline in &mut pipelines {
            let chunk = pipeline.buffer.take_chunk();
            if !chunk.is_empty() {
                pipeline.partitions.write_chunk(&chunk)?;
                pipeline.offsets.seal_batch()?;
            }
        }

        // Commit sequence; the manifest publish below is the commit point
        registry.save(&self.layout)?;

        let mut partitions: Vec<PartitionEntry> = Vec::new();
        let mut index_writers: Vec<OffsetIndexWriter> = Vec::new();
        for pipeline in pipelines {
            published.extend(pipeline.partitions.staged_final_paths());
            partitions.extend(pipeline.partitions.finalize()?);
            index_writers.push(pipeline.offsets);
        }

        // Copy live index files aside so an abort after a partial
        // republish can put them back.
        let tmp_dir = self.layout.tmp_dir(ingest_id);
        std::fs::create_dir_all(&tmp_dir)?;
        for kind in EventKind::ALL {
            let live = self.layout.offsets_path(kind);
            if live.is_file() {
                let backup = tmp_dir.join(format!("prev_{}", kind.offsets_file_name()));
                std::fs::copy(&live, &backup)?;
                index_backups.push((backup, live));
            }
        }
        for writer in index_writers {
            writer.finalize()?;
        }

        let mut rows_added: BTreeMap<String, u64> = BTreeMap::new();
        for partition in &partitions {
            *rows_added.entry(partition.kind.clone()).or_insert(0) += partition.rows;
        }
        let parse_errors = stats.malformed + stats.missing_timestamp;

        let summary = IngestSummary {
            ingest_id: ingest_id.to_string(),
            started_at: started_at.to_string(),
            finished_at: Utc::now().to_rfc3339(),
            source_files: sources
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            rows_added: rows_added.clone(),
            parse_errors,
            warnings: warnings.clone(),
        };
        manifest.apply_ingest(summary, partitions);
        manifest.publish(&self.layout)?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            ingest_id = %ingest_id,
            dataset_version = manifest.dataset_version,
            lines = stats.lines,
            slow_queries = stats.slow_queries,
            authentications = stats.authentications,
            connections = stats.connections,
            parse_errors,
            elapsed_ms,
            "ingest committed"
        );

        Ok(IngestReport {
            ingest_id: ingest_id.to_string(),
            dataset_version: manifest.dataset_version,
            rows_added,
            lines: stats.lines,
            parse_errors,
            skipped: stats.skipped,
            warnings,
            elapsed_ms,
        })
    }

    /// Stream one source file through the normalizer, appending events to
    /// the per-kind pipelines and flushing full chunks as they fill.
    fn parse_source(
        &self,
        source: &Path,
        file_id: u32,
        pipelines: &mut [KindPipeline],
        stats: &mut NormalizerStats,
    ) -> IngestResult<()> {
        let normalizer = Normalizer::new(file_id);
        let mut reader = open_source(source)?;

        let mut byte_offset: u64 = 0;
        let mut line_number: u64 = 0;
        let mut raw_line: Vec<u8> = Vec::new();
        loop {
            raw_line.clear();
            let read = reader.read_until(b'\n', &mut raw_line)?;
            if read == 0 {
                break;
            }
            line_number += 1;
            let line = String::from_utf8_lossy(&raw_line);
            let outcome =
                normalizer.normalize_line(&line, byte_offset, read as u32, line_number);
            byte_offset += read as u64;

            stats.record(&outcome);
            if let LineOutcome::Event(event) = outcome {
                self.route_event(event, pipelines)?;
            }
        }
        Ok(())
    }

    fn route_event(
        &self,
        event: NormalizedEvent,
        pipelines: &mut [KindPipeline],
    ) -> IngestResult<()> {
        let index = match event.kind() {
            EventKind::SlowQuery => 0,
            EventKind::Auth => 1,
            EventKind::Connection => 2,
        };
        let pipeline = &mut pipelines[index];
        pipeline.offsets.append(OffsetIndexEntry::from_event(&event));
        let signal = pipeline.buffer.append(event)?;
        if signal != FlushSignal::None {
            let chunk = pipeline.buffer.take_chunk();
            pipeline.partitions.write_chunk(&chunk)?;
            pipeline.offsets.seal_batch()?;
        }
        Ok(())
    }

    fn copy_source(&self, source: &Path) -> IngestResult<()> {
        let dest_dir = self.layout.source_dir();
        std::fs::create_dir_all(&dest_dir)?;
        let name = source
            .file_name()
            .ok_or_else(|| IngestError::SourceMissing(source.to_path_buf()))?;
        std::fs::copy(source, dest_dir.join(name))?;
        Ok(())
    }
}

/// Open a source file as a line reader, decompressing `.gz` transparently.
/// Offsets produced downstream are into the decompressed stream.
fn open_source(path: &Path) -> IngestResult<Box<dyn BufRead>> {
    let file = std::fs::File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(std::io::BufReader::new(flate2::read::GzDecoder::new(
            std::io::BufReader::new(file),
        ))))
    } else {
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(root: &Path) -> Settings {
        Settings {
            out_root: root.to_path_buf(),
            keep_source_copy: false,
            ..Settings::default()
        }
    }

    fn write_log(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    const SLOW: &str = r#"{"t":{"$date":"2026-01-02T03:04:05.123+00:00"},"s":"I","c":"COMMAND","ctx":"conn12","msg":"Slow query","attr":{"ns":"shop.orders","durationMillis":245,"docsExamined":5000,"nReturned":10,"planSummary":"COLLSCAN","command":{"find":"orders","filter":{"status":"open"}}}}"#;
    const AUTH: &str = r#"{"t":{"$date":"2026-01-02T03:04:06.000+00:00"},"s":"I","c":"ACCESS","ctx":"conn13","msg":"Authentication failed","attr":{"user":{"user":"alice","db":"admin"},"mechanism":"SCRAM-SHA-256","remote":"10.0.0.9:51234","error":"AuthenticationFailed"}}"#;
    const CONN: &str = r#"{"t":{"$date":"2026-01-02T03:04:07.000+00:00"},"s":"I","c":"NETWORK","ctx":"listener","msg":"Connection accepted","attr":{"remote":"10.0.0.9:51234","connectionId":814,"connectionCount":42}}"#;

    #[test]
    fn test_three_line_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_log(dir.path(), "mongod.log", &[SLOW, AUTH, CONN, "plain banner"]);
        let settings = test_settings(&dir.path().join("ds"));
        let coordinator = IngestCoordinator::new(settings.clone());

        let report = coordinator.run(&[source]).unwrap();
        assert_eq!(report.dataset_version, 1);
        assert_eq!(report.rows_added["slow_queries"], 1);
        assert_eq!(report.rows_added["authentications"], 1);
        assert_eq!(report.rows_added["connections"], 1);
        assert_eq!(report.parse_errors, 0);
        assert_eq!(report.skipped, 1);

        let layout = DatasetLayout::new(&settings.out_root);
        let manifest = Manifest::load(&layout, "snappy").unwrap();
        assert_eq!(manifest.dataset_version, 1);
        assert_eq!(manifest.partitions.len(), 3);
        assert_eq!(manifest.total_rows(), 3);
        for kind in EventKind::ALL {
            assert!(layout.offsets_path(kind).exists());
        }
        assert!(layout.file_map_path().exists());
        // Scratch space is removed on success
        assert!(!settings.out_root.join("tmp").join(&report.ingest_id).exists());
        // Lock released
        assert!(!layout.lock_path().exists());
    }

    #[test]
    fn test_malformed_lines_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_log(
            dir.path(),
            "mongod.log",
            &[SLOW, "{broken json", r#"{"msg":"Slow query","attr":{}}"#],
        );
        let coordinator = IngestCoordinator::new(test_settings(&dir.path().join("ds")));

        let report = coordinator.run(&[source]).unwrap();
        assert_eq!(report.total_rows(), 1);
        assert_eq!(report.parse_errors, 2);
    }

    #[test]
    fn test_missing_source_keeps_dataset_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir.path().join("ds"));
        let coordinator = IngestCoordinator::new(settings.clone());

        let err = coordinator
            .run(&[dir.path().join("nope.log")])
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceMissing(_)));
        assert!(!settings.out_root.join("manifest.json").exists());
    }

    #[test]
    fn test_second_ingest_appends() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_log(dir.path(), "a.log", &[SLOW]);
        let b = write_log(dir.path(), "b.log", &[SLOW, CONN]);
        let settings = test_settings(&dir.path().join("ds"));
        let coordinator = IngestCoordinator::new(settings.clone());

        coordinator.run(&[a]).unwrap();
        let report = coordinator.run(&[b]).unwrap();
        assert_eq!(report.dataset_version, 2);

        let layout = DatasetLayout::new(&settings.out_root);
        let manifest = Manifest::load(&layout, "snappy").unwrap();
        assert_eq!(manifest.row_counts["slow_queries"], 2);
        assert_eq!(manifest.row_counts["connections"], 1);
        assert_eq!(manifest.ingests.len(), 2);
    }

    #[test]
    fn test_reingest_same_file_reuses_file_id() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_log(dir.path(), "a.log", &[SLOW]);
        let settings = test_settings(&dir.path().join("ds"));
        let coordinator = IngestCoordinator::new(settings.clone());

        coordinator.run(&[source.clone()]).unwrap();
        coordinator.run(&[source]).unwrap();

        let layout = DatasetLayout::new(&settings.out_root);
        let registry = FileRegistry::load(&layout).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_gzip_source() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mongod.log.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        writeln!(encoder, "{}", SLOW).unwrap();
        writeln!(encoder, "{}", CONN).unwrap();
        encoder.finish().unwrap();

        let coordinator = IngestCoordinator::new(test_settings(&dir.path().join("ds")));
        let report = coordinator.run(&[path]).unwrap();
        assert_eq!(report.total_rows(), 2);
    }

    #[test]
    fn test_chunk_threshold_splits_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<&str> = std::iter::repeat(SLOW).take(5).collect();
        let source = write_log(dir.path(), "a.log", &lines);
        let mut settings = test_settings(&dir.path().join("ds"));
        settings.chunk_rows = 2;
        let coordinator = IngestCoordinator::new(settings.clone());

        coordinator.run(&[source]).unwrap();

        let layout = DatasetLayout::new(&settings.out_root);
        let manifest = Manifest::load(&layout, "snappy").unwrap();
        // 5 rows with chunk_rows=2: two full chunks plus a final partial
        let slow: Vec<_> = manifest.partitions_for("slow_queries").collect();
        assert_eq!(slow.len(), 3);
        assert_eq!(slow.iter().map(|p| p.rows).sum::<u64>(), 5);
        assert_eq!(slow[0].rows, 2);
        assert_eq!(slow[2].rows, 1);
    }

    #[test]
    fn test_keep_source_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_log(dir.path(), "a.log", &[SLOW]);
        let mut settings = test_settings(&dir.path().join("ds"));
        settings.keep_source_copy = true;
        let coordinator = IngestCoordinator::new(settings.clone());

        coordinator.run(&[source]).unwrap();
        assert!(settings.out_root.join("source").join("a.log").exists());
    }
}
