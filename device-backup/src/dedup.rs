//! Registry of files already present in the backup root.
//!
//! Identity is `(file name, size)`. Timestamps are not part of the key:
//! device and desktop filesystems disagree on precision, so a re-pulled file
//! rarely keeps an identical mtime. Two different files sharing a name and a
//! byte count anywhere in the tree are treated as the same file.

use crate::backup::manifest::MANIFEST_FILE;
use crate::device::FileRecord;
use crate::fs::walker::{for_each_file, WalkOptions};
use crate::gallery::{INDEX_FILE, THUMBNAIL_DIR};
use crate::BackupError;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub name: String,
    pub size: u64,
}

impl DedupKey {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    pub fn for_record(record: &FileRecord) -> Self {
        Self::new(record.name(), record.size)
    }
}

/// Shared set of known keys: concurrent lookups, exclusive inserts.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    keys: RwLock<HashSet<DedupKey>>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every regular file under `root`.
    ///
    /// Unreadable entries are skipped. An error means the root itself could
    /// not be walked; whatever was registered before stays in place.
    pub fn load(&self, root: &Path) -> crate::Result<usize> {
        let options = WalkOptions {
            exclude_root_names: vec![
                MANIFEST_FILE.to_string(),
                THUMBNAIL_DIR.to_string(),
                INDEX_FILE.to_string(),
            ],
        };

        let mut keys = self.keys.write();
        let before = keys.len();
        let skipped = for_each_file(root, &options, |file| {
            keys.insert(DedupKey::new(file.name, file.size));
        })
        .map_err(|e| BackupError::RegistryScan {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

        let added = keys.len() - before;
        if skipped > 0 {
            debug!("Registry scan skipped {} unreadable entries", skipped);
        }
        info!("Registry loaded {} files from {}", added, root.display());
        Ok(added)
    }

    /// Whether a file with the same name and size is already backed up
    pub fn exists(&self, record: &FileRecord) -> bool {
        self.contains(&DedupKey::for_record(record))
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.read().contains(key)
    }

    /// Record a file that was just transferred
    pub fn add(&self, record: &FileRecord) {
        self.insert(DedupKey::for_record(record));
    }

    pub fn insert(&self, key: DedupKey) {
        self.keys.write().insert(key);
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(path: &str, size: u64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size,
            timestamp: "2024-01-01 10:00".to_string(),
            is_dir: false,
        }
    }

    #[test]
    fn test_load_registers_existing_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("2024/01")).unwrap();
        fs::write(dir.path().join("2024/01/IMG_1.jpg"), b"12345").unwrap();

        let registry = DedupRegistry::new();
        assert_eq!(registry.load(dir.path()).unwrap(), 1);

        // same name and size anywhere on the device
        assert!(registry.exists(&record("/sdcard/DCIM/IMG_1.jpg", 5)));
        assert!(registry.exists(&record("/sdcard/Other/IMG_1.jpg", 5)));
        // different size or different name
        assert!(!registry.exists(&record("/sdcard/DCIM/IMG_1.jpg", 6)));
        assert!(!registry.exists(&record("/sdcard/DCIM/IMG_2.jpg", 5)));
    }

    #[test]
    fn test_manifest_is_not_registered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{}").unwrap();

        let registry = DedupRegistry::new();
        registry.load(dir.path()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_gallery_output_is_not_registered() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(THUMBNAIL_DIR)).unwrap();
        fs::write(dir.path().join(THUMBNAIL_DIR).join("thumb_2024_01_a.jpg"), b"t").unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"<html>").unwrap();
        fs::create_dir_all(dir.path().join("2024/01")).unwrap();
        fs::write(dir.path().join("2024/01/a.jpg"), b"aa").unwrap();

        let registry = DedupRegistry::new();
        assert_eq!(registry.load(dir.path()).unwrap(), 1);
        assert!(registry.contains(&DedupKey::new("a.jpg", 2)));
    }

    #[test]
    fn test_missing_root_is_reported() {
        let dir = TempDir::new().unwrap();
        let registry = DedupRegistry::new();
        let err = registry.load(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, BackupError::RegistryScan { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_after_transfer() {
        let registry = DedupRegistry::new();
        let file = record("/sdcard/DCIM/new.jpg", 42);
        assert!(!registry.exists(&file));
        registry.add(&file);
        assert!(registry.exists(&file));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = Arc::new(DedupRegistry::new());
        registry.insert(DedupKey::new("shared.jpg", 7));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.insert(DedupKey::new(format!("file{}.jpg", i), i));
                    registry.contains(&DedupKey::new("shared.jpg", 7))
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(registry.len(), 9);
    }
}
