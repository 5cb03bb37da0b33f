//! Traversal of the local backup tree.
//!
//! Unreadable entries below the root are skipped and counted; only a root
//! that cannot be read at all is an error.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Entries skipped directly under the root; a matching directory is
    /// skipped with everything below it
    pub exclude_root_names: Vec<String>,
}

/// A regular file found under the backup root
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File name only
    pub name: String,

    /// File size in bytes
    pub size: u64,
}

impl LocalFile {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            relative_path,
            size: metadata.len(),
        })
    }
}

/// Call `callback` for every regular file under `root`.
///
/// Returns the number of entries that could not be read.
pub fn for_each_file<F>(root: &Path, options: &WalkOptions, mut callback: F) -> std::io::Result<usize>
where
    F: FnMut(LocalFile),
{
    // walkdir reports a missing root as an entry error; surface it as fatal
    std::fs::read_dir(root)?;

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !(entry.depth() == 1 && is_excluded(entry, &options.exclude_root_names)));

    let mut skipped = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                skipped += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        match LocalFile::from_entry(&entry, root) {
            Ok(file) => callback(file),
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                skipped += 1;
            }
        }
    }

    Ok(skipped)
}

fn is_excluded(entry: &DirEntry, names: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    names.iter().any(|name| file_name == name.as_str())
}
