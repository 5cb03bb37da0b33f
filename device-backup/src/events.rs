//! Progress events for front ends.
//!
//! Runs publish on an [`EventBus`]; a CLI, web UI or desktop shell
//! subscribes and renders them. Only result collectors publish, never pool
//! workers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of queued events per subscriber
const EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ProgressEvent {
    #[serde(rename = "backup:started")]
    BackupStarted {
        run_id: String,
        source: String,
        destination: String,
    },

    /// Device listing finished
    #[serde(rename = "scan:completed")]
    ScanCompleted {
        run_id: String,
        entries: usize,
        files: usize,
        total_bytes: u64,
    },

    #[serde(rename = "file:completed")]
    FileCompleted {
        run_id: String,
        source_path: String,
        local_path: String,
        size: u64,
        processed: usize,
        total: usize,
    },

    /// Already present in the backup root
    #[serde(rename = "file:skipped")]
    FileSkipped {
        run_id: String,
        source_path: String,
        processed: usize,
        total: usize,
    },

    #[serde(rename = "file:failed")]
    FileFailed {
        run_id: String,
        source_path: String,
        error: String,
        processed: usize,
        total: usize,
    },

    #[serde(rename = "backup:completed")]
    BackupCompleted {
        run_id: String,
        transferred_files: usize,
        transferred_bytes: u64,
        skipped_files: usize,
        failed_files: usize,
        duration_secs: u64,
        cancelled: bool,
    },

    #[serde(rename = "restore:started")]
    RestoreStarted {
        run_id: String,
        /// "manifest" or "directory"
        mode: String,
        total: usize,
    },

    #[serde(rename = "restore:file")]
    RestoreFile {
        run_id: String,
        original_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        processed: usize,
        total: usize,
    },

    #[serde(rename = "restore:completed")]
    RestoreCompleted {
        run_id: String,
        restored_files: usize,
        failed_files: usize,
        duration_secs: u64,
        cancelled: bool,
    },

    #[serde(rename = "gallery:started")]
    GalleryStarted {
        run_id: String,
        root: String,
        total: usize,
    },

    /// One thumbnail ready (created, reused or placeholder)
    #[serde(rename = "gallery:item")]
    GalleryItem {
        run_id: String,
        path: String,
        processed: usize,
        total: usize,
    },

    #[serde(rename = "gallery:completed")]
    GalleryCompleted {
        run_id: String,
        items: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        index_path: Option<String>,
        duration_secs: u64,
        cancelled: bool,
    },

    /// Non-fatal problem (registry scan, manifest persistence, partial listing)
    #[serde(rename = "warning")]
    Warning { run_id: String, message: String },
}

/// Fan-out of progress events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish to current subscribers; having none is fine.
    pub fn publish(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("No event subscribers: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
