//! Backup manifest: where every backed-up file came from.
//!
//! Serialized as `manifest.json` at the backup root:
//!
//! ```json
//! { "entries": [ { "original_path": "/sdcard/DCIM/IMG_1.jpg",
//!                  "local_path": "2024/01/IMG_1.jpg",
//!                  "size": 1234, "timestamp": "2024-01-05 10:00" } ] }
//! ```

use crate::BackupError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Well-known file name under the backup root
pub const MANIFEST_FILE: &str = "manifest.json";

/// Metadata for a single backed-up file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path on the device at backup time
    pub original_path: String,
    /// Path relative to the backup root, `/`-separated
    pub local_path: String,
    pub size: u64,
    pub timestamp: String,
}

#[derive(Serialize)]
struct ManifestDocument<'a> {
    entries: &'a [ManifestEntry],
}

#[derive(Deserialize)]
struct OwnedManifestDocument {
    entries: Vec<ManifestEntry>,
}

/// Append-only list of entries, in the order transfers completed.
#[derive(Debug, Default)]
pub struct Manifest {
    entries: Mutex<Vec<ManifestEntry>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Append an entry
    pub fn add(&self, original: &str, local: &Path, size: u64, timestamp: &str) {
        self.entries.lock().push(ManifestEntry {
            original_path: original.to_string(),
            local_path: portable_relative_path(local),
            size,
            timestamp: timestamp.to_string(),
        });
    }

    pub fn entries(&self) -> Vec<ManifestEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the manifest for a backup root
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(MANIFEST_FILE)
    }

    /// Write the manifest to `<root>/manifest.json`.
    ///
    /// When several entries point at the same local file only the newest is
    /// written, since that is the file now on disk.
    pub fn save(&self, root: &Path) -> crate::Result<PathBuf> {
        let entries = latest_per_local_path(&self.entries.lock());
        let data = serde_json::to_vec_pretty(&ManifestDocument { entries: &entries })?;

        let path = Self::path_in(root);
        let tmp = root.join(format!("{}.tmp", MANIFEST_FILE));
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;

        info!("Manifest saved: {} entries at {}", entries.len(), path.display());
        Ok(path)
    }

    /// Read `<root>/manifest.json`. Missing and corrupt files are both errors.
    pub fn load(root: &Path) -> crate::Result<Self> {
        let path = Self::path_in(root);
        let data = std::fs::read(&path)
            .map_err(|e| BackupError::Manifest(format!("{}: {}", path.display(), e)))?;
        let document: OwnedManifestDocument = serde_json::from_slice(&data)
            .map_err(|e| BackupError::Manifest(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_entries(document.entries))
    }

    /// Move an unreadable manifest out of the way so the next save does not
    /// destroy it. Returns where it went.
    pub fn set_aside(root: &Path) -> crate::Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let aside = root.join(format!("{}.corrupt-{}", MANIFEST_FILE, stamp));
        std::fs::rename(Self::path_in(root), &aside)?;
        Ok(aside)
    }
}

fn latest_per_local_path(entries: &[ManifestEntry]) -> Vec<ManifestEntry> {
    let mut seen = HashSet::new();
    let mut latest: Vec<ManifestEntry> = entries
        .iter()
        .rev()
        .filter(|e| seen.insert(e.local_path.as_str()))
        .cloned()
        .collect();
    latest.reverse();
    latest
}

/// Relative path with `/` separators so manifests move between platforms.
fn portable_relative_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new();
        manifest.add(
            "/sdcard/DCIM/IMG_20240105_1.jpg",
            &Path::new("2024").join("01").join("IMG_20240105_1.jpg"),
            1234,
            "2024-01-05 10:00",
        );
        manifest.add("/sdcard/Download/a b.pdf", Path::new("2023/11/a b.pdf"), 9, "2023-11-02 08:15");

        let path = manifest.save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(MANIFEST_FILE));

        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded.entries(), manifest.entries());
        assert_eq!(loaded.entries()[0].local_path, "2024/01/IMG_20240105_1.jpg");
    }

    #[test]
    fn test_field_names() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new();
        manifest.add("/sdcard/x.jpg", Path::new("Unknown_Date/Misc/x.jpg"), 1, "bad");
        manifest.save(dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        let entry = &raw["entries"][0];
        assert_eq!(entry["original_path"], "/sdcard/x.jpg");
        assert_eq!(entry["local_path"], "Unknown_Date/Misc/x.jpg");
        assert_eq!(entry["size"], 1);
        assert_eq!(entry["timestamp"], "bad");
    }

    #[test]
    fn test_load_missing_or_corrupt() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(Manifest::load(dir.path()), Err(BackupError::Manifest(_))));

        std::fs::write(dir.path().join(MANIFEST_FILE), b"{ not json").unwrap();
        assert!(matches!(Manifest::load(dir.path()), Err(BackupError::Manifest(_))));
    }

    #[test]
    fn test_set_aside_keeps_original_bytes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"{ \"entries\": [ ], }").unwrap();

        let aside = Manifest::set_aside(dir.path()).unwrap();
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(aside
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("manifest.json.corrupt-"));
        assert_eq!(std::fs::read(&aside).unwrap(), b"{ \"entries\": [ ], }");
    }

    #[test]
    fn test_save_keeps_newest_entry_per_local_path() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new();
        manifest.add("/sdcard/A/x.jpg", Path::new("2024/01/x.jpg"), 1, "2024-01-01 10:00");
        manifest.add("/sdcard/B/y.jpg", Path::new("2024/01/y.jpg"), 2, "2024-01-01 10:00");
        manifest.add("/sdcard/C/x.jpg", Path::new("2024/01/x.jpg"), 3, "2024-01-02 10:00");

        manifest.save(dir.path()).unwrap();
        let loaded = Manifest::load(dir.path()).unwrap().entries();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].original_path, "/sdcard/B/y.jpg");
        assert_eq!(loaded[1].original_path, "/sdcard/C/x.jpg");
    }

    #[test]
    fn test_concurrent_add() {
        let manifest = Arc::new(Manifest::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let manifest = Arc::clone(&manifest);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let local = format!("2024/01/{}_{}.jpg", t, i);
                        manifest.add("/sdcard/x", Path::new(&local), i, "");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(manifest.len(), 100);
    }
}
