//! Dataset Manifest
//!
//! The manifest is the single source of truth for what a dataset contains.
//! Readers load it once per operation and see a consistent snapshot;
//! writers stage partition files first and publish them by rewriting the
//! manifest atomically, so a partition is invisible until the manifest
//! that names it lands. `dataset_version` increments on every publish and
//! doubles as the cache-invalidation token on the query side.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::layout::{atomic_write, DatasetLayout};

/// One published partition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Event kind directory name (`slow_queries`, ...).
    pub kind: String,
    /// Path relative to the dataset root, forward slashes.
    pub path: String,
    pub rows: u64,
    pub bytes: u64,
    /// Minimum `ts_epoch` across the partition's rows.
    pub min_ts: i64,
    /// Maximum `ts_epoch` across the partition's rows.
    pub max_ts: i64,
    /// CRC32 of the file contents as written.
    pub crc32: u32,
}

/// Record of one completed ingest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub ingest_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub source_files: Vec<String>,
    /// Rows added per kind directory name.
    pub rows_added: BTreeMap<String, u64>,
    pub parse_errors: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Monotonic publish counter, 0 for a dataset with no ingests.
    pub dataset_version: u64,
    pub schema_version: u32,
    pub created_at: String,
    pub updated_at: String,
    /// Codec name every Parquet file in the dataset was written with.
    pub compression: String,
    /// Cumulative row counts per kind directory name.
    pub row_counts: BTreeMap<String, u64>,
    /// Cumulative count of lines dropped as malformed.
    pub parse_errors: u64,
    pub partitions: Vec<PartitionEntry>,
    /// History of ingest runs, oldest first.
    pub ingests: Vec<IngestSummary>,
}

impl Manifest {
    /// A fresh manifest for an empty dataset.
    pub fn empty(compression: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Manifest {
            dataset_version: 0,
            schema_version: loghouse_core::SCHEMA_VERSION,
            created_at: now.clone(),
            updated_at: now,
            compression: compression.to_string(),
            row_counts: BTreeMap::new(),
            parse_errors: 0,
            partitions: Vec::new(),
            ingests: Vec::new(),
        }
    }

    /// Load the manifest, treating a missing file as an empty dataset.
    /// A file that exists but does not parse is an error, not an empty
    /// dataset; silently restarting from zero would orphan partitions.
    pub fn load(layout: &DatasetLayout, default_compression: &str) -> StorageResult<Manifest> {
        let path = layout.manifest_path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Manifest::empty(default_compression));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| StorageError::ManifestCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Atomically publish this manifest, bumping `dataset_version`.
    pub fn publish(&mut self, layout: &DatasetLayout) -> StorageResult<()> {
        self.dataset_version += 1;
        self.updated_at = Utc::now().to_rfc3339();
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write(&layout.manifest_path(), &bytes)?;
        tracing::info!(
            dataset_version = self.dataset_version,
            partitions = self.partitions.len(),
            "manifest published"
        );
        Ok(())
    }

    /// Fold a completed ingest into the manifest (in memory only; the
    /// caller publishes).
    pub fn apply_ingest(&mut self, summary: IngestSummary, partitions: Vec<PartitionEntry>) {
        for partition in &partitions {
            *self.row_counts.entry(partition.kind.clone()).or_insert(0) += partition.rows;
        }
        self.parse_errors += summary.parse_errors;
        self.partitions.extend(partitions);
        self.ingests.push(summary);
    }

    /// Partitions of one kind, in manifest order.
    pub fn partitions_for<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a PartitionEntry> + 'a {
        self.partitions.iter().filter(move |p| p.kind == kind)
    }

    pub fn total_rows(&self) -> u64 {
        self.row_counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_partition(kind: &str, rows: u64) -> PartitionEntry {
        PartitionEntry {
            kind: kind.to_string(),
            path: format!("{}/2026/01/01/chunk_00000.parquet", kind),
            rows,
            bytes: 1024,
            min_ts: 100,
            max_ts: 200,
            crc32: 0xdead_beef,
        }
    }

    fn sample_summary() -> IngestSummary {
        IngestSummary {
            ingest_id: "ing-1".to_string(),
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            finished_at: "2026-01-01T00:01:00+00:00".to_string(),
            source_files: vec!["mongod.log".to_string()],
            rows_added: BTreeMap::from([("slow_queries".to_string(), 5)]),
            parse_errors: 2,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let manifest = Manifest::load(&layout, "snappy").unwrap();
        assert_eq!(manifest.dataset_version, 0);
        assert!(manifest.partitions.is_empty());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        std::fs::write(layout.manifest_path(), b"{ not json").unwrap();
        let err = Manifest::load(&layout, "snappy").unwrap_err();
        assert!(matches!(err, StorageError::ManifestCorrupt { .. }));
    }

    #[test]
    fn test_publish_bumps_version_and_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let mut manifest = Manifest::empty("snappy");
        manifest.apply_ingest(sample_summary(), vec![sample_partition("slow_queries", 5)]);
        manifest.publish(&layout).unwrap();
        assert_eq!(manifest.dataset_version, 1);

        let reloaded = Manifest::load(&layout, "snappy").unwrap();
        assert_eq!(reloaded.dataset_version, 1);
        assert_eq!(reloaded.row_counts["slow_queries"], 5);
        assert_eq!(reloaded.parse_errors, 2);
        assert_eq!(reloaded.ingests.len(), 1);
    }

    #[test]
    fn test_row_counts_accumulate_across_ingests() {
        let mut manifest = Manifest::empty("snappy");
        manifest.apply_ingest(sample_summary(), vec![sample_partition("slow_queries", 5)]);
        manifest.apply_ingest(sample_summary(), vec![sample_partition("slow_queries", 7)]);
        assert_eq!(manifest.row_counts["slow_queries"], 12);
        assert_eq!(manifest.parse_errors, 4);
        assert_eq!(manifest.partitions_for("slow_queries").count(), 2);
        assert_eq!(manifest.partitions_for("connections").count(), 0);
    }
}
