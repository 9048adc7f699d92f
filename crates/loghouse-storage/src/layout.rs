//! Dataset Path Conventions
//!
//! A dataset is a single directory tree:
//!
//! ```text
//! <root>/
//!   manifest.json
//!   manifest.lock                  (present only while an ingest runs)
//!   slow_queries/<Y>/<M>/<D>/chunk_NNNNN.parquet
//!   authentications/...
//!   connections/...
//!   index/
//!     slow_queries_offsets.parquet
//!     authentications_offsets.parquet
//!     connections_offsets.parquet
//!     file_map.json
//!   source/                        (optional copies of ingested logs)
//!   tmp/<ingest_id>/               (scratch, removed on finalize/abort)
//! ```
//!
//! `DatasetLayout` is the one place that knows this shape; everything else
//! asks it for paths.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use loghouse_core::EventKind;

use crate::error::StorageResult;

/// Path helper rooted at a dataset directory.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DatasetLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("manifest.lock")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    pub fn offsets_path(&self, kind: EventKind) -> PathBuf {
        self.index_dir().join(kind.offsets_file_name())
    }

    pub fn file_map_path(&self) -> PathBuf {
        self.index_dir().join("file_map.json")
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn tmp_dir(&self, ingest_id: &str) -> PathBuf {
        self.root.join("tmp").join(ingest_id)
    }

    pub fn kind_dir(&self, kind: EventKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Day directory for a partition, derived from the event timestamp.
    pub fn partition_dir(&self, kind: EventKind, ts: DateTime<Utc>) -> PathBuf {
        self.kind_dir(kind)
            .join(format!("{:04}", ts.year()))
            .join(format!("{:02}", ts.month()))
            .join(format!("{:02}", ts.day()))
    }

    /// File name for the `seq`-th chunk within a day directory.
    pub fn chunk_file_name(seq: u32) -> String {
        format!("chunk_{:05}.parquet", seq)
    }

    /// Partition path relative to the dataset root, as stored in the
    /// manifest. Always uses forward slashes.
    pub fn relative_partition_path(kind: EventKind, ts: DateTime<Utc>, seq: u32) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}",
            kind.dir_name(),
            ts.year(),
            ts.month(),
            ts.day(),
            Self::chunk_file_name(seq)
        )
    }

    /// Resolve a manifest-relative path against the root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in relative.split('/') {
            path.push(part);
        }
        path
    }

    /// Create the fixed directories a dataset needs before first use.
    pub fn ensure_layout(&self) -> StorageResult<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.index_dir())?;
        for kind in EventKind::ALL {
            std::fs::create_dir_all(self.kind_dir(kind))?;
        }
        Ok(())
    }
}

/// Write `bytes` to `path` atomically: write a sibling temp file, flush,
/// then rename over the destination.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    use std::io::Write;

    let tmp = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_partition_paths() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let rel = DatasetLayout::relative_partition_path(EventKind::SlowQuery, ts, 3);
        assert_eq!(rel, "slow_queries/2026/03/07/chunk_00003.parquet");

        let layout = DatasetLayout::new("/data/ds");
        assert_eq!(
            layout.resolve(&rel),
            PathBuf::from("/data/ds/slow_queries/2026/03/07/chunk_00003.parquet")
        );
    }

    #[test]
    fn test_ensure_layout_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path().join("ds"));
        layout.ensure_layout().unwrap();
        assert!(layout.index_dir().is_dir());
        assert!(layout.kind_dir(EventKind::Connection).is_dir());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_offsets_path_per_kind() {
        let layout = DatasetLayout::new("/ds");
        assert_eq!(
            layout.offsets_path(EventKind::Auth),
            PathBuf::from("/ds/index/authentications_offsets.parquet")
        );
    }
}
