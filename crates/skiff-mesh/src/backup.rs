//! Durable snapshot backup
//!
//! The node -> snapshot map is written as one JSON document on every publish
//! and read once at startup, so a restarted control plane keeps serving the
//! configuration proxies already converged on.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skiff_common::{Result, SkiffError};
use tracing::{debug, info};

use crate::snapshot::XdsSnapshot;

/// Current on-disk format
pub const BACKUP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct BackupDocument {
    format_version: u32,
    /// Unix millis of the write
    saved_at: i64,
    snapshots: BTreeMap<String, XdsSnapshot>,
}

/// File-backed store for the snapshot cache
#[derive(Debug)]
pub struct SnapshotBackup {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotBackup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every stored snapshot; a missing file is an empty backup
    pub fn load(&self) -> Result<BTreeMap<String, XdsSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot backup found, starting empty");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(backup_error(&self.path, "read", e)),
        };

        let document: BackupDocument =
            serde_json::from_slice(&bytes).map_err(|e| backup_error(&self.path, "parse", e))?;
        if document.format_version != BACKUP_FORMAT_VERSION {
            return Err(SkiffError::Backup(format!(
                "unsupported backup format version {} in {}",
                document.format_version,
                self.path.display()
            )));
        }

        info!(
            path = %self.path.display(),
            nodes = document.snapshots.len(),
            "Loaded snapshot backup"
        );
        Ok(document.snapshots)
    }

    /// Replace the stored map, writing a temporary file then renaming it over
    /// the backup so readers never see a partial document
    pub fn save(&self, snapshots: BTreeMap<String, XdsSnapshot>) -> Result<()> {
        self.save_with(|| snapshots)
    }

    /// Like [`save`](Self::save), with `collect` run while holding the write lock
    pub fn save_with<F>(&self, collect: F) -> Result<()>
    where
        F: FnOnce() -> BTreeMap<String, XdsSnapshot>,
    {
        let _guard = self.write_lock.lock();
        let snapshots = collect();
        let document = BackupDocument {
            format_version: BACKUP_FORMAT_VERSION,
            saved_at: chrono::Utc::now().timestamp_millis(),
            snapshots,
        };
        let bytes =
            serde_json::to_vec(&document).map_err(|e| backup_error(&self.path, "encode", e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| backup_error(&self.path, "create directory for", e))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file =
            fs::File::create(&tmp_path).map_err(|e| backup_error(&tmp_path, "create", e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| backup_error(&tmp_path, "write", e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| backup_error(&self.path, "replace", e))?;

        debug!(
            path = %self.path.display(),
            nodes = document.snapshots.len(),
            bytes = bytes.len(),
            "Saved snapshot backup"
        );
        Ok(())
    }
}

fn backup_error(path: &Path, action: &str, err: impl std::fmt::Display) -> SkiffError {
    SkiffError::Backup(format!("failed to {} {}: {}", action, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backup = SnapshotBackup::new(dir.path().join("snapshots.json"));
        assert!(backup.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let backup = SnapshotBackup::new(dir.path().join("nested").join("snapshots.json"));

        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "node1".to_string(),
            XdsSnapshot::new("1", vec![], vec![], vec![], vec![]),
        );
        backup.save(snapshots.clone()).unwrap();

        assert_eq!(backup.load().unwrap(), snapshots);
        assert!(!dir.path().join("nested").join("snapshots.tmp").exists());
    }

    #[test]
    fn test_save_with_collects_under_lock() {
        let dir = tempfile::tempdir().unwrap();
        let backup = SnapshotBackup::new(dir.path().join("snapshots.json"));

        backup
            .save_with(|| {
                assert!(backup.write_lock.try_lock().is_none());
                BTreeMap::from([("node1".to_string(), XdsSnapshot::empty())])
            })
            .unwrap();

        assert!(backup.load().unwrap().contains_key("node1"));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.json");
        fs::write(&path, b"not json").unwrap();

        let err = SnapshotBackup::new(&path).load().unwrap_err();
        assert!(matches!(err, SkiffError::Backup(_)));
    }

    #[test]
    fn test_unsupported_format_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.json");
        fs::write(&path, br#"{"format_version":99,"saved_at":0,"snapshots":{}}"#).unwrap();

        let err = SnapshotBackup::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("unsupported backup format version 99"));
    }
}
