//! Dataset Ingest Lock
//!
//! One writer per dataset. The lock is a JSON file created with
//! `create_new` next to the manifest, recording the holder's pid and
//! acquisition time. A second ingest attempt fails with
//! `IngestInProgress`. A leftover lock is only broken when the caller
//! explicitly asks for an override and the lock is stale: its holder is a
//! dead process, or the file is older than the configured stale age,
//! which covers crashed ingests on hosts where liveness cannot be
//! checked. An override request against a live lock is still refused.
//!
//! The lock file is removed on drop, so a run that panics past the
//! acquire still cleans up its lock during unwind.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    acquired_at: String,
}

/// Held exclusive ingest lock; released on drop.
#[derive(Debug)]
pub struct IngestLock {
    path: PathBuf,
}

impl IngestLock {
    /// Acquire the lock at `path`. When `override_stale` is set, a held
    /// lock that fails the staleness check is broken and re-acquired;
    /// otherwise a held lock always yields `IngestInProgress`.
    pub fn acquire(
        path: PathBuf,
        stale_after_secs: u64,
        override_stale: bool,
    ) -> IngestResult<IngestLock> {
        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let contents = Self::read_contents(&path)?;
                if override_stale && Self::is_stale(&contents, stale_after_secs) {
                    tracing::warn!(
                        pid = contents.pid,
                        acquired_at = %contents.acquired_at,
                        "breaking stale ingest lock"
                    );
                    std::fs::remove_file(&path)?;
                    Self::try_create(&path).map_err(IngestError::from)
                } else {
                    Err(IngestError::IngestInProgress {
                        pid: contents.pid,
                        acquired_at: contents.acquired_at,
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(path: &PathBuf) -> std::io::Result<IngestLock> {
        use std::io::Write;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let contents = LockContents {
            pid: std::process::id(),
            acquired_at: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_vec(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(IngestLock {
            path: path.clone(),
        })
    }

    fn read_contents(path: &PathBuf) -> IngestResult<LockContents> {
        let bytes = std::fs::read(path)?;
        match serde_json::from_slice(&bytes) {
            Ok(contents) => Ok(contents),
            // Unreadable lock file: treat as maximally stale
            Err(_) => Ok(LockContents {
                pid: 0,
                acquired_at: String::new(),
            }),
        }
    }

    fn is_stale(contents: &LockContents, stale_after_secs: u64) -> bool {
        if contents.pid == 0 {
            return true;
        }
        if !process_alive(contents.pid) {
            return true;
        }
        match DateTime::parse_from_rfc3339(&contents.acquired_at) {
            Ok(acquired) => {
                let age = Utc::now().signed_duration_since(acquired.with_timezone(&Utc));
                age.num_seconds() >= stale_after_secs as i64
            }
            Err(_) => true,
        }
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove ingest lock");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // No cheap liveness probe; rely on the age threshold alone
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");

        let lock = IngestLock::acquire(path.clone(), 3600, false).unwrap();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");

        let _held = IngestLock::acquire(path.clone(), 3600, false).unwrap();
        let err = IngestLock::acquire(path, 3600, false).unwrap_err();
        assert!(matches!(err, IngestError::IngestInProgress { .. }));
    }

    #[test]
    fn test_stale_lock_kept_without_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        let contents = LockContents {
            pid: 0,
            acquired_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(&path, serde_json::to_vec(&contents).unwrap()).unwrap();

        let err = IngestLock::acquire(path, 3600, false).unwrap_err();
        assert!(matches!(err, IngestError::IngestInProgress { .. }));
    }

    #[test]
    fn test_dead_holder_lock_broken_on_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        let contents = LockContents {
            // pid 0 never names a live holder
            pid: 0,
            acquired_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(&path, serde_json::to_vec(&contents).unwrap()).unwrap();

        let lock = IngestLock::acquire(path.clone(), 3600, true).unwrap();
        assert!(path.exists());
        drop(lock);
    }

    #[test]
    fn test_live_lock_survives_override_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        let contents = LockContents {
            pid: std::process::id(),
            acquired_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(&path, serde_json::to_vec(&contents).unwrap()).unwrap();

        let err = IngestLock::acquire(path, 3600, true).unwrap_err();
        assert!(matches!(err, IngestError::IngestInProgress { .. }));
    }

    #[test]
    fn test_old_lock_broken_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        let contents = LockContents {
            pid: std::process::id(),
            acquired_at: "2020-01-01T00:00:00+00:00".to_string(),
        };
        std::fs::write(&path, serde_json::to_vec(&contents).unwrap()).unwrap();

        assert!(IngestLock::acquire(path, 3600, true).is_ok());
    }

    #[test]
    fn test_garbage_lock_file_broken_on_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        std::fs::write(&path, b"not json at all").unwrap();

        assert!(IngestLock::acquire(path, 3600, true).is_ok());
    }
}
