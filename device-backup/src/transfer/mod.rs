//! Transfer jobs and the worker pools that run them.
//!
//! Every job handed to a pool comes back exactly once on the pool's result
//! stream, whether it was transferred, skipped as a duplicate, failed, timed
//! out or was abandoned because the run was cancelled.

pub mod agent;
pub mod pool;
pub mod progress;

use crate::backup::manifest::ManifestEntry;
use crate::dedup::DedupKey;
use crate::device::listing::remote_basename;
use crate::device::FileRecord;
use crate::sorter;
use std::path::{Path, PathBuf};

pub use agent::{RestoreAgent, TransferAgent};
pub use pool::{JobHandler, PoolOptions, RestorePool, TransferPool, WorkerPool};

/// Anything a pool can run.
pub trait PoolJob: Send + Sync + 'static {
    /// Device-side path, used in logs and failure reasons
    fn label(&self) -> &str;
}

/// Pull one device file into the backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub source_path: String,
    /// Absolute local destination
    pub dest_path: PathBuf,
    pub size: u64,
    pub timestamp: String,
}

impl TransferJob {
    /// Job for `record`, placed under `backup_root` by the date sorter.
    pub fn for_record(record: &FileRecord, backup_root: &Path) -> Self {
        Self {
            source_path: record.path.clone(),
            dest_path: backup_root.join(sorter::destination(record)),
            size: record.size,
            timestamp: record.timestamp.clone(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(remote_basename(&self.source_path), self.size)
    }
}

impl PoolJob for TransferJob {
    fn label(&self) -> &str {
        &self.source_path
    }
}

/// Push one backed-up file back to where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreJob {
    /// Absolute local path
    pub local_path: PathBuf,
    pub original_path: String,
    /// Position in the run, for progress display
    pub index: usize,
    pub total: usize,
}

impl RestoreJob {
    pub fn for_entry(entry: &ManifestEntry, backup_root: &Path, index: usize, total: usize) -> Self {
        let local_path = entry
            .local_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(backup_root.to_path_buf(), |path, part| path.join(part));

        Self {
            local_path,
            original_path: entry.original_path.clone(),
            index,
            total,
        }
    }
}

impl PoolJob for RestoreJob {
    fn label(&self) -> &str {
        &self.original_path
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Resolved by the dedup registry without touching the device
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobResult<J> {
    pub job: J,
    pub outcome: Outcome,
}

impl<J> JobResult<J> {
    pub fn is_skipped(&self) -> bool {
        self.outcome == Outcome::Skipped
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

pub type TransferResult = JobResult<TransferJob>;
pub type RestoreResult = JobResult<RestoreJob>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_job_destination() {
        let record = FileRecord {
            path: "/sdcard/DCIM/Camera/IMG_20231225_120000.jpg".to_string(),
            size: 2048,
            timestamp: "2024-01-01 10:00".to_string(),
            is_dir: false,
        };
        let job = TransferJob::for_record(&record, Path::new("/backup"));
        assert_eq!(
            job.dest_path,
            Path::new("/backup").join("2023").join("12").join("IMG_20231225_120000.jpg")
        );
        assert_eq!(job.dedup_key(), DedupKey::new("IMG_20231225_120000.jpg", 2048));
        assert_eq!(job.label(), "/sdcard/DCIM/Camera/IMG_20231225_120000.jpg");
    }

    #[test]
    fn test_restore_job_from_entry() {
        let entry = ManifestEntry {
            original_path: "/sdcard/DCIM/a.jpg".to_string(),
            local_path: "2024/01/a.jpg".to_string(),
            size: 1,
            timestamp: String::new(),
        };
        let job = RestoreJob::for_entry(&entry, Path::new("/backup"), 3, 10);
        assert_eq!(job.local_path, Path::new("/backup").join("2024").join("01").join("a.jpg"));
        assert_eq!(job.original_path, "/sdcard/DCIM/a.jpg");
        assert_eq!((job.index, job.total), (3, 10));
    }

    #[test]
    fn test_result_accessors() {
        let job = RestoreJob {
            local_path: PathBuf::from("/backup/a"),
            original_path: "/sdcard/a".to_string(),
            index: 0,
            total: 1,
        };
        let failed = JobResult {
            job: job.clone(),
            outcome: Outcome::Failed("boom".to_string()),
        };
        assert_eq!(failed.error(), Some("boom"));
        assert!(!failed.is_skipped());

        let skipped = JobResult {
            job,
            outcome: Outcome::Skipped,
        };
        assert!(skipped.is_skipped());
        assert!(skipped.error().is_none());
    }
}
