//! Source File Registry
//!
//! The offset index stores a compact `file_id` instead of repeating full
//! source paths per record. `index/file_map.json` resolves ids back to
//! paths. Registration is idempotent by path and content: re-ingesting an
//! unchanged file returns its existing id. When the file at a known path
//! has different contents (log rotation, truncation) it gets a fresh id,
//! so index records written against the old contents keep resolving to
//! the entry whose checksum and size they were read under.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageResult;
use crate::layout::{atomic_write, DatasetLayout};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Source path as given at registration time.
    pub path: String,
    /// SHA-256 of the file contents at registration time, hex.
    pub sha256: String,
    pub bytes: u64,
    pub registered_at: String,
}

/// Result of registering a source file.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub file_id: u32,
    /// True when the path was already registered with matching contents.
    pub reused: bool,
    /// True when a known path's content checksum no longer matches its
    /// latest entry. The returned `file_id` is a fresh one; prior index
    /// records stay bound to the old id and entry.
    pub source_changed: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FileRegistry {
    entries: BTreeMap<u32, FileEntry>,
}

impl FileRegistry {
    /// Load the registry, treating a missing file as empty.
    pub fn load(layout: &DatasetLayout) -> StorageResult<FileRegistry> {
        match std::fs::read(layout.file_map_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileRegistry::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist atomically to `index/file_map.json`.
    pub fn save(&self, layout: &DatasetLayout) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write(&layout.file_map_path(), &bytes)
    }

    /// Register a source file. An unchanged known path reuses its id; a
    /// known path whose contents differ gets a new id so the old entry
    /// keeps describing the bytes earlier index spans were read from.
    pub fn register_source(&mut self, path: &Path) -> StorageResult<RegisterOutcome> {
        let path_str = path.to_string_lossy().into_owned();
        let checksum = file_sha256(path)?;
        let bytes = std::fs::metadata(path)?.len();

        // Latest entry wins; a rotated path can appear more than once.
        if let Some((&file_id, entry)) =
            self.entries.iter().rev().find(|(_, e)| e.path == path_str)
        {
            if entry.sha256 == checksum {
                return Ok(RegisterOutcome {
                    file_id,
                    reused: true,
                    source_changed: false,
                });
            }
            tracing::warn!(
                old_file_id = file_id,
                path = %path_str,
                "source file changed on disk since last ingest; assigning a new id"
            );
            let file_id = self.insert_entry(path_str, checksum, bytes);
            return Ok(RegisterOutcome {
                file_id,
                reused: false,
                source_changed: true,
            });
        }

        let file_id = self.insert_entry(path_str, checksum, bytes);
        Ok(RegisterOutcome {
            file_id,
            reused: false,
            source_changed: false,
        })
    }

    fn insert_entry(&mut self, path: String, sha256: String, bytes: u64) -> u32 {
        let file_id = self.entries.keys().next_back().map_or(1, |max| max + 1);
        self.entries.insert(
            file_id,
            FileEntry {
                path,
                sha256,
                bytes,
                registered_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        file_id
    }

    pub fn resolve(&self, file_id: u32) -> Option<&FileEntry> {
        self.entries.get(&file_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Streaming SHA-256 of a file, hex encoded.
pub fn file_sha256(path: &Path) -> StorageResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.log", b"alpha\n");
        let b = write_file(dir.path(), "b.log", b"beta\n");

        let mut registry = FileRegistry::default();
        let out_a = registry.register_source(&a).unwrap();
        let out_b = registry.register_source(&b).unwrap();
        assert_eq!(out_a.file_id, 1);
        assert_eq!(out_b.file_id, 2);
        assert!(!out_a.reused);
    }

    #[test]
    fn test_register_same_path_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.log", b"alpha\n");

        let mut registry = FileRegistry::default();
        let first = registry.register_source(&a).unwrap();
        let second = registry.register_source(&a).unwrap();
        assert_eq!(first.file_id, second.file_id);
        assert!(second.reused);
        assert!(!second.source_changed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_changed_content_gets_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.log", b"alpha\n");

        let mut registry = FileRegistry::default();
        let first = registry.register_source(&a).unwrap();
        write_file(dir.path(), "a.log", b"rotated contents\n");
        let second = registry.register_source(&a).unwrap();

        assert_ne!(first.file_id, second.file_id);
        assert!(second.source_changed);
        assert!(!second.reused);
        assert_eq!(registry.len(), 2);

        // The original entry still describes the pre-rotation bytes.
        let old = registry.resolve(first.file_id).unwrap();
        assert_eq!(old.bytes, 6);
        let new = registry.resolve(second.file_id).unwrap();
        assert_eq!(new.bytes, 17);
        assert_ne!(old.sha256, new.sha256);
    }

    #[test]
    fn test_reregister_after_rotation_reuses_latest_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.log", b"alpha\n");

        let mut registry = FileRegistry::default();
        registry.register_source(&a).unwrap();
        write_file(dir.path(), "a.log", b"rotated contents\n");
        let second = registry.register_source(&a).unwrap();
        let third = registry.register_source(&a).unwrap();

        assert_eq!(second.file_id, third.file_id);
        assert!(third.reused);
        assert!(!third.source_changed);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.ensure_layout().unwrap();
        let a = write_file(dir.path(), "a.log", b"alpha\n");

        let mut registry = FileRegistry::default();
        let out = registry.register_source(&a).unwrap();
        registry.save(&layout).unwrap();

        let reloaded = FileRegistry::load(&layout).unwrap();
        let entry = reloaded.resolve(out.file_id).unwrap();
        assert_eq!(entry.path, a.to_string_lossy());
        assert_eq!(entry.bytes, 6);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let registry = FileRegistry::load(&layout).unwrap();
        assert!(registry.is_empty());
    }
}
