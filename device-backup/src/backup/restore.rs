//! Restore: push a backup root back onto the device.

use super::manifest::{Manifest, ManifestEntry};
use crate::device::CommandExecutor;
use crate::events::{EventBus, ProgressEvent};
use crate::transfer::progress::{format_duration, RunProgress};
use crate::transfer::{Outcome, PoolOptions, RestoreAgent, RestoreJob, RestorePool};
use crate::BackupError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Local backup root
    pub backup_root: PathBuf,
    /// Device directory used when the root has no manifest
    pub fallback_remote: String,
    pub pool: PoolOptions,
}

/// How a backup root will be restored
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreMode {
    /// Every entry goes back to its original device path
    Manifest { entries: Vec<ManifestEntry> },
    /// No usable manifest: the whole root is pushed as one directory
    Directory { remote: String },
}

impl RestoreMode {
    pub fn name(&self) -> &'static str {
        match self {
            RestoreMode::Manifest { .. } => "manifest",
            RestoreMode::Directory { .. } => "directory",
        }
    }

    /// Number of restore jobs this plan produces
    pub fn total(&self) -> usize {
        match self {
            RestoreMode::Manifest { entries } => entries.len(),
            RestoreMode::Directory { .. } => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreSummary {
    pub run_id: String,
    pub mode: &'static str,
    pub total_files: usize,
    pub restored_files: usize,
    pub failed_files: usize,
    /// `(device path, reason)` for every failed push
    pub failures: Vec<(String, String)>,
    pub cancelled: bool,
    pub duration_secs: u64,
}

/// Decide how `options.backup_root` will be restored without touching the
/// device. A missing or unreadable manifest selects directory mode.
pub fn plan_restore(options: &RestoreOptions) -> crate::Result<RestoreMode> {
    if !options.backup_root.is_dir() {
        return Err(BackupError::Config(format!(
            "backup root {} does not exist",
            options.backup_root.display()
        )));
    }

    match Manifest::load(&options.backup_root) {
        Ok(manifest) => Ok(RestoreMode::Manifest {
            entries: manifest.entries(),
        }),
        Err(e) => {
            if Manifest::path_in(&options.backup_root).exists() {
                warn!("{}. Falling back to directory restore", e);
            }
            Ok(RestoreMode::Directory {
                remote: options.fallback_remote.clone(),
            })
        }
    }
}

/// Restore a backup root following `mode` (see [`plan_restore`]).
pub async fn run_restore<E: CommandExecutor>(
    executor: Arc<E>,
    options: RestoreOptions,
    mode: RestoreMode,
    events: &EventBus,
    cancel: CancellationToken,
) -> crate::Result<RestoreSummary> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();
    let mode_name = mode.name();
    let total = mode.total();

    info!(
        "Starting {} restore {} of {} ({} jobs)",
        mode_name,
        run_id,
        options.backup_root.display(),
        total
    );
    events.publish(ProgressEvent::RestoreStarted {
        run_id: run_id.clone(),
        mode: mode_name.to_string(),
        total,
    });

    let failures = match mode {
        RestoreMode::Manifest { entries } => {
            restore_entries(executor, &options, entries, &run_id, events, cancel.clone()).await
        }
        RestoreMode::Directory { remote } => {
            restore_directory(executor.as_ref(), &options, &remote, &run_id, events, &cancel).await
        }
    };

    let failed_files = failures.len();
    let cancelled = cancel.is_cancelled();
    let duration_secs = started.elapsed().as_secs();
    let restored_files = total - failed_files;

    info!(
        "Restore {}: {} restored, {} failed in {}",
        if cancelled { "cancelled" } else { "completed" },
        restored_files,
        failed_files,
        format_duration(duration_secs)
    );
    events.publish(ProgressEvent::RestoreCompleted {
        run_id: run_id.clone(),
        restored_files,
        failed_files,
        duration_secs,
        cancelled,
    });

    Ok(RestoreSummary {
        run_id,
        mode: mode_name,
        total_files: total,
        restored_files,
        failed_files,
        failures,
        cancelled,
        duration_secs,
    })
}

async fn restore_entries<E: CommandExecutor>(
    executor: Arc<E>,
    options: &RestoreOptions,
    entries: Vec<ManifestEntry>,
    run_id: &str,
    events: &EventBus,
    cancel: CancellationToken,
) -> Vec<(String, String)> {
    let total = entries.len();
    let agent = Arc::new(RestoreAgent::new(executor));
    let (pool, mut results) = RestorePool::start(agent, options.pool.clone(), cancel);

    let root = options.backup_root.clone();
    let producer = tokio::spawn(async move {
        for (index, entry) in entries.iter().enumerate() {
            pool.submit(RestoreJob::for_entry(entry, &root, index + 1, total))
                .await;
        }
        pool.close().await;
    });

    let mut progress = RunProgress::new(total);
    let mut failures = Vec::new();
    while let Some(result) = results.recv().await {
        progress.record(&result.outcome, 0);
        let job = result.job;

        let error = match result.outcome {
            Outcome::Failed(reason) => {
                warn!("Failed to restore {}: {}", job.original_path, reason);
                failures.push((job.original_path.clone(), reason.clone()));
                Some(reason)
            }
            Outcome::Completed | Outcome::Skipped => None,
        };

        events.publish(ProgressEvent::RestoreFile {
            run_id: run_id.to_string(),
            original_path: job.original_path,
            error,
            processed: progress.processed(),
            total,
        });
    }

    if let Err(e) = producer.await {
        error!("Restore producer task failed: {}", e);
    }

    failures
}

async fn restore_directory<E: CommandExecutor>(
    executor: &E,
    options: &RestoreOptions,
    remote: &str,
    run_id: &str,
    events: &EventBus,
    cancel: &CancellationToken,
) -> Vec<(String, String)> {
    info!(
        "No manifest found, pushing {} to {}",
        options.backup_root.display(),
        remote
    );

    let push = executor.push(&options.backup_root, remote);
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackupError::Cancelled),
        result = push => result,
    };

    let error = result.err().map(|e| e.to_string());
    if let Some(reason) = &error {
        warn!("Directory restore to {} failed: {}", remote, reason);
    }

    events.publish(ProgressEvent::RestoreFile {
        run_id: run_id.to_string(),
        original_path: remote.to_string(),
        error: error.clone(),
        processed: 1,
        total: 1,
    });

    error
        .map(|reason| vec![(remote.to_string(), reason)])
        .unwrap_or_default()
}
