//! Job handlers backed by a device executor.

use super::pool::JobHandler;
use super::{RestoreJob, TransferJob};
use crate::device::CommandExecutor;
use crate::BackupError;
use std::sync::Arc;

/// Pulls device files into the backup root.
pub struct TransferAgent<E> {
    executor: Arc<E>,
}

impl<E: CommandExecutor> TransferAgent<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self { executor }
    }
}

impl<E: CommandExecutor> JobHandler for TransferAgent<E> {
    type Job = TransferJob;

    async fn handle(&self, job: &TransferJob) -> crate::Result<()> {
        if let Some(dir) = job.dest_path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| BackupError::Transfer {
                path: job.source_path.clone(),
                reason: format!("failed to create directory {}: {}", dir.display(), e),
            })?;
        }

        self.executor
            .pull(&job.source_path, &job.dest_path)
            .await
            .map_err(|e| BackupError::Transfer {
                path: job.source_path.clone(),
                reason: format!("pull failed: {}", e),
            })
    }
}

/// Pushes backed-up files back to their original device paths.
pub struct RestoreAgent<E> {
    executor: Arc<E>,
}

impl<E: CommandExecutor> RestoreAgent<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self { executor }
    }
}

impl<E: CommandExecutor> JobHandler for RestoreAgent<E> {
    type Job = RestoreJob;

    async fn handle(&self, job: &RestoreJob) -> crate::Result<()> {
        self.executor
            .push(&job.local_path, &job.original_path)
            .await
            .map_err(|e| BackupError::Transfer {
                path: job.original_path.clone(),
                reason: format!("push failed: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_transfer_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(MockDevice::new().file("/sdcard/DCIM/a.jpg", b"jpeg"));
        let agent = TransferAgent::new(Arc::clone(&device));

        let dest = dir.path().join("2024").join("01").join("a.jpg");
        let job = TransferJob {
            source_path: "/sdcard/DCIM/a.jpg".to_string(),
            dest_path: dest.clone(),
            size: 4,
            timestamp: "2024-01-01 10:00".to_string(),
        };

        agent.handle(&job).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg");
        assert_eq!(*device.pulled.lock(), vec!["/sdcard/DCIM/a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_transfer_failure_names_source() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(MockDevice::new().failing("/sdcard/gone.jpg"));
        let agent = TransferAgent::new(device);

        let job = TransferJob {
            source_path: "/sdcard/gone.jpg".to_string(),
            dest_path: dir.path().join("x").join("gone.jpg"),
            size: 1,
            timestamp: String::new(),
        };

        let err = agent.handle(&job).await.unwrap_err();
        assert!(err.to_string().contains("/sdcard/gone.jpg"));
    }

    #[tokio::test]
    async fn test_restore_pushes_to_original_path() {
        let device = Arc::new(MockDevice::new());
        let agent = RestoreAgent::new(Arc::clone(&device));

        let job = RestoreJob {
            local_path: PathBuf::from("/backup/2024/01/a.jpg"),
            original_path: "/sdcard/DCIM/a.jpg".to_string(),
            index: 0,
            total: 1,
        };
        agent.handle(&job).await.unwrap();

        let pushed = device.pushed.lock();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1, "/sdcard/DCIM/a.jpg");
    }
}
