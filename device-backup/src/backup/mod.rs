//! Backup and restore runs.
//!
//! A backup run ties the pieces together:
//! - device walker (listing + parser)
//! - date sorter for destinations
//! - dedup registry loaded from the backup root
//! - transfer pool, fed by a producer task
//! - result collector updating manifest, registry and progress events

pub mod manifest;
pub mod restore;

use crate::dedup::DedupRegistry;
use crate::device::walker::{regular_files, walk};
use crate::device::CommandExecutor;
use crate::events::{EventBus, ProgressEvent};
use crate::transfer::progress::{format_bytes, format_duration, format_speed, RunProgress};
use crate::transfer::{
    Outcome, PoolOptions, TransferAgent, TransferJob, TransferPool, TransferResult,
};
use manifest::Manifest;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use restore::{plan_restore, run_restore, RestoreMode, RestoreOptions, RestoreSummary};

/// What to back up and where
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Device directory
    pub source: String,
    /// Local backup root
    pub destination: PathBuf,
    pub pool: PoolOptions,
}

/// Backup execution result
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub run_id: String,
    pub total_files: usize,
    pub total_bytes: u64,
    pub transferred_files: usize,
    pub transferred_bytes: u64,
    pub skipped_files: usize,
    pub failed_files: usize,
    /// `(device path, reason)` for every failed transfer
    pub failures: Vec<(String, String)>,
    pub manifest_entries: usize,
    pub manifest_saved: bool,
    pub cancelled: bool,
    pub duration_secs: u64,
}

/// Back up every regular file under `options.source`.
///
/// Listing failures and an unusable backup root abort the run before any
/// transfer starts. Everything after that is per-file: failures end up in
/// the summary and in `file:failed` events.
pub async fn run_backup<E: CommandExecutor>(
    executor: Arc<E>,
    options: BackupOptions,
    events: &EventBus,
    cancel: CancellationToken,
) -> crate::Result<BackupSummary> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let dest_root = options.destination.clone();

    info!(
        "Starting backup {} of {} into {}",
        run_id,
        options.source,
        dest_root.display()
    );
    events.publish(ProgressEvent::BackupStarted {
        run_id: run_id.clone(),
        source: options.source.clone(),
        destination: dest_root.display().to_string(),
    });

    let listing = walk(executor.as_ref(), &options.source).await?;
    if let Some(reason) = &listing.incomplete {
        events.publish(ProgressEvent::Warning {
            run_id: run_id.clone(),
            message: format!("Listing of {} is incomplete: {}", options.source, reason),
        });
    }
    let entries = listing.records.len();
    let files = regular_files(listing.records);
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();

    info!(
        "Found {} files ({}) in {} entries",
        files.len(),
        format_bytes(total_bytes),
        entries
    );
    events.publish(ProgressEvent::ScanCompleted {
        run_id: run_id.clone(),
        entries,
        files: files.len(),
        total_bytes,
    });

    tokio::fs::create_dir_all(&dest_root).await?;

    // Registry scan walks the whole backup root; keep it off the runtime threads.
    let registry = Arc::new(DedupRegistry::new());
    let scan_registry = Arc::clone(&registry);
    let scan_root = dest_root.clone();
    let scan = tokio::task::spawn_blocking(move || scan_registry.load(&scan_root))
        .await
        .map_err(|e| crate::BackupError::RegistryScan {
            path: dest_root.display().to_string(),
            reason: e.to_string(),
        })
        .and_then(|loaded| loaded);
    if let Err(e) = scan {
        warn!("Registry warning: {}. Continuing without deduplication", e);
        events.publish(ProgressEvent::Warning {
            run_id: run_id.clone(),
            message: format!("Registry warning: {}", e),
        });
    }

    // Earlier runs' entries stay restorable.
    let (manifest, keep_existing) = previous_manifest(&dest_root, &run_id, events);

    let agent = Arc::new(TransferAgent::new(executor));
    let (pool, mut results) = TransferPool::start(
        agent,
        Some(Arc::clone(&registry)),
        options.pool.clone(),
        cancel.clone(),
    );

    let mut collector = BackupCollector::new(
        run_id.clone(),
        dest_root.clone(),
        &manifest,
        &registry,
        events,
        files.len(),
    );

    let producer_root = dest_root.clone();
    let producer = tokio::spawn(async move {
        for file in &files {
            pool.submit(TransferJob::for_record(file, &producer_root)).await;
        }
        pool.close().await;
    });

    while let Some(result) = results.recv().await {
        collector.record(result);
    }
    let BackupCollector {
        progress, failures, ..
    } = collector;

    if let Err(e) = producer.await {
        error!("Backup producer task failed: {}", e);
    }
    if !progress.is_complete() {
        warn!(
            "Result stream ended after {} of {} files",
            progress.processed(),
            progress.total_files
        );
    }

    let manifest_saved = if manifest.is_empty() {
        false
    } else if keep_existing {
        let message = format!(
            "Manifest not saved: unreadable {} could not be moved aside",
            Manifest::path_in(&dest_root).display()
        );
        warn!("{}", message);
        events.publish(ProgressEvent::Warning {
            run_id: run_id.clone(),
            message,
        });
        false
    } else {
        match manifest.save(&dest_root) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to save manifest: {}", e);
                events.publish(ProgressEvent::Warning {
                    run_id: run_id.clone(),
                    message: format!("Failed to save manifest: {}", e),
                });
                false
            }
        }
    };

    let cancelled = cancel.is_cancelled();
    let duration_secs = progress.elapsed().as_secs();

    info!(
        "Backup {}: {} transferred ({}, {}), {} skipped, {} failed in {}",
        if cancelled { "cancelled" } else { "completed" },
        progress.completed_files,
        format_bytes(progress.transferred_bytes),
        format_speed(progress.average_speed()),
        progress.skipped_files,
        progress.failed_files,
        format_duration(duration_secs)
    );
    events.publish(ProgressEvent::BackupCompleted {
        run_id: run_id.clone(),
        transferred_files: progress.completed_files,
        transferred_bytes: progress.transferred_bytes,
        skipped_files: progress.skipped_files,
        failed_files: progress.failed_files,
        duration_secs,
        cancelled,
    });

    Ok(BackupSummary {
        run_id,
        total_files: progress.total_files,
        total_bytes,
        transferred_files: progress.completed_files,
        transferred_bytes: progress.transferred_bytes,
        skipped_files: progress.skipped_files,
        failed_files: progress.failed_files,
        failures,
        manifest_entries: manifest.len(),
        manifest_saved,
        cancelled,
        duration_secs,
    })
}

/// Manifest the run continues from, and whether the file on disk must be
/// left untouched.
///
/// A missing manifest starts an empty one. An unreadable one is renamed
/// aside first; if that fails the file stays and the run will not save.
fn previous_manifest(root: &Path, run_id: &str, events: &EventBus) -> (Manifest, bool) {
    let error = match Manifest::load(root) {
        Ok(previous) => {
            info!("Continuing manifest with {} existing entries", previous.len());
            return (previous, false);
        }
        Err(_) if !Manifest::path_in(root).exists() => return (Manifest::new(), false),
        Err(e) => e,
    };

    let (message, keep_existing) = match Manifest::set_aside(root) {
        Ok(aside) => (
            format!("{}. Moved to {}, starting a new manifest", error, aside.display()),
            false,
        ),
        Err(e) => (
            format!("{}. Could not move it aside: {}", error, e),
            true,
        ),
    };
    warn!("{}", message);
    events.publish(ProgressEvent::Warning {
        run_id: run_id.to_string(),
        message,
    });
    (Manifest::new(), keep_existing)
}

/// Applies transfer results as they arrive: counters, manifest, registry
/// and events.
struct BackupCollector<'a> {
    run_id: String,
    dest_root: PathBuf,
    manifest: &'a Manifest,
    registry: &'a DedupRegistry,
    events: &'a EventBus,
    progress: RunProgress,
    failures: Vec<(String, String)>,
}

impl<'a> BackupCollector<'a> {
    fn new(
        run_id: String,
        dest_root: PathBuf,
        manifest: &'a Manifest,
        registry: &'a DedupRegistry,
        events: &'a EventBus,
        total_files: usize,
    ) -> Self {
        Self {
            run_id,
            dest_root,
            manifest,
            registry,
            events,
            progress: RunProgress::new(total_files),
            failures: Vec::new(),
        }
    }

    fn record(&mut self, result: TransferResult) {
        let job = result.job;
        let progress = &mut self.progress;
        progress.record(&result.outcome, job.size);
        debug!(
            "Backup progress: {}/{} ({:.1}%)",
            progress.processed(),
            progress.total_files,
            progress.percent_complete()
        );

        match result.outcome {
            Outcome::Completed => {
                let local = job
                    .dest_path
                    .strip_prefix(&self.dest_root)
                    .unwrap_or(job.dest_path.as_path())
                    .to_path_buf();
                self.manifest
                    .add(&job.source_path, &local, job.size, &job.timestamp);
                // Later jobs for the same file are skipped from here on.
                self.registry.insert(job.dedup_key());

                self.events.publish(ProgressEvent::FileCompleted {
                    run_id: self.run_id.clone(),
                    source_path: job.source_path,
                    local_path: local.display().to_string(),
                    size: job.size,
                    processed: progress.processed(),
                    total: progress.total_files,
                });
            }
            Outcome::Skipped => {
                self.events.publish(ProgressEvent::FileSkipped {
                    run_id: self.run_id.clone(),
                    source_path: job.source_path,
                    processed: progress.processed(),
                    total: progress.total_files,
                });
            }
            Outcome::Failed(reason) => {
                warn!("Failed to back up {}: {}", job.source_path, reason);
                self.events.publish(ProgressEvent::FileFailed {
                    run_id: self.run_id.clone(),
                    source_path: job.source_path.clone(),
                    error: reason.clone(),
                    processed: progress.processed(),
                    total: progress.total_files,
                });
                self.failures.push((job.source_path, reason));
            }
        }
    }
}
