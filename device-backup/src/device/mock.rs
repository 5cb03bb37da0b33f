//! In-memory device used by unit tests.

use super::CommandExecutor;
use crate::BackupError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub(crate) struct MockDevice {
    listing: Mutex<Option<crate::Result<String>>>,
    files: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    pub(crate) pulled: Mutex<Vec<String>>,
    pub(crate) pushed: Mutex<Vec<(PathBuf, String)>>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self {
            listing: Mutex::new(None),
            files: HashMap::new(),
            failing: HashSet::new(),
            pulled: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_listing(listing: crate::Result<String>) -> Self {
        let device = Self::new();
        *device.listing.lock() = Some(listing);
        device
    }

    pub(crate) fn file(mut self, remote: &str, contents: &[u8]) -> Self {
        self.files.insert(remote.to_string(), contents.to_vec());
        self
    }

    pub(crate) fn failing(mut self, remote: &str) -> Self {
        self.failing.insert(remote.to_string());
        self
    }
}

impl CommandExecutor for MockDevice {
    async fn list_recursive(&self, _path: &str) -> crate::Result<String> {
        self.listing.lock().take().unwrap_or_else(|| Ok(String::new()))
    }

    async fn push(&self, local: &Path, remote: &str) -> crate::Result<()> {
        if self.failing.contains(remote) {
            return Err(BackupError::Transfer {
                path: remote.to_string(),
                reason: "remote couldn't create file: Read-only file system".to_string(),
            });
        }
        self.pushed.lock().push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    async fn pull(&self, remote: &str, local: &Path) -> crate::Result<()> {
        if self.failing.contains(remote) {
            return Err(BackupError::Transfer {
                path: remote.to_string(),
                reason: "remote object does not exist".to_string(),
            });
        }
        let contents = self.files.get(remote).cloned().unwrap_or_default();
        std::fs::write(local, contents)?;
        self.pulled.lock().push(remote.to_string());
        Ok(())
    }
}
