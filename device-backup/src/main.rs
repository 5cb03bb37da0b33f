//! Device Backup - Main entry point

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use device_backup::backup::{self, BackupOptions, RestoreMode, RestoreOptions};
use device_backup::device::adb::AdbClient;
use device_backup::device::walker::{regular_files, walk};
use device_backup::events::{EventBus, ProgressEvent};
use device_backup::transfer::progress::{format_bytes, format_duration};
use device_backup::transfer::PoolOptions;
use device_backup::utils::shutdown::ShutdownCoordinator;
use device_backup::{config::Config, gallery, sorter, utils};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Device serial (overrides config)
    #[arg(short, long, global = true)]
    serial: Option<String>,

    /// Stop the adb server when done
    #[arg(long, global = true)]
    kill_server: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices known to adb
    Devices,

    /// List a device directory and show where each file would be stored
    Scan {
        /// Device directory
        source: String,
    },

    /// Back up a device directory
    Backup {
        /// Device directory (overrides config)
        #[arg(long)]
        source: Option<String>,

        /// Local backup root (overrides config)
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Concurrent transfers (overrides config)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Push a backup root back onto the device
    Restore {
        /// Local backup root (overrides config)
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Concurrent transfers (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Write thumbnails and an index.html into a backup root
    Gallery {
        /// Local backup root (overrides config)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if args.serial.is_some() {
        config.device.serial = args.serial.clone();
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting device-backup v{}", env!("CARGO_PKG_VERSION"));

    if let Command::Devices = args.command {
        let client = AdbClient::locate(config.device.adb_path.as_deref())?;
        let devices = client.devices().await?;
        if devices.is_empty() {
            println!("No devices attached");
        }
        for device in devices {
            println!(
                "{}\t{}\t{}",
                device.serial,
                device.state,
                device.model.as_deref().unwrap_or("-")
            );
        }
        return finish(&client, args.kill_server).await;
    }

    // Ctrl+C / SIGTERM cancels the running operation; in-flight transfers
    // report as cancelled and the manifest is still written.
    let shutdown = ShutdownCoordinator::new();
    let signal_shutdown = shutdown.clone();
    let signal_handle = tokio::spawn(async move {
        signal_shutdown.wait_for_signal().await;
    });

    let events = EventBus::new();
    let printer = tokio::spawn(print_events(events.subscribe()));

    // The gallery only reads the local backup root.
    if let Command::Gallery { dest } = &args.command {
        let root = dest.clone().unwrap_or_else(|| config.backup.destination.clone());
        let outcome = run_gallery(&root, &events, &shutdown).await;
        drop(events);
        if let Err(e) = printer.await {
            tracing::warn!("Event printer failed: {}", e);
        }
        signal_handle.abort();
        return outcome;
    }

    let client = Arc::new(AdbClient::connect(&config.device).await?);

    let outcome = match args.command {
        Command::Devices | Command::Gallery { .. } => Ok(()),
        Command::Scan { source } => scan(client.as_ref(), &source).await,
        Command::Backup {
            source,
            dest,
            workers,
        } => {
            let mut pool = PoolOptions::backup();
            pool.workers = workers.unwrap_or(config.backup.workers);
            pool.queue_capacity = config.backup.queue_capacity;
            pool.result_capacity = config.backup.queue_capacity;
            pool.job_timeout = config.backup.job_timeout();

            let options = BackupOptions {
                source: source.unwrap_or_else(|| config.backup.source.clone()),
                destination: dest.unwrap_or_else(|| config.backup.destination.clone()),
                pool,
            };
            run_backup(Arc::clone(&client), options, &events, &shutdown).await
        }
        Command::Restore { dest, workers, yes } => {
            let mut pool = PoolOptions::restore();
            pool.workers = workers.unwrap_or(config.restore.workers);
            pool.queue_capacity = config.restore.queue_capacity;
            pool.result_capacity = config.restore.queue_capacity;
            pool.job_timeout = config.restore.job_timeout();

            let options = RestoreOptions {
                backup_root: dest.unwrap_or_else(|| config.backup.destination.clone()),
                fallback_remote: config.restore.fallback_remote.clone(),
                pool,
            };
            run_restore(Arc::clone(&client), options, yes, &events, &shutdown).await
        }
    };

    drop(events);
    if let Err(e) = printer.await {
        tracing::warn!("Event printer failed: {}", e);
    }
    signal_handle.abort();

    finish(client.as_ref(), args.kill_server).await?;
    outcome
}

async fn finish(client: &AdbClient, kill_server: bool) -> Result<()> {
    if kill_server {
        if let Err(e) = client.kill_server().await {
            tracing::warn!("Failed to stop adb server: {}", e);
        }
    }
    Ok(())
}

async fn scan(client: &AdbClient, source: &str) -> Result<()> {
    let listing = walk(client, source).await?;
    if let Some(reason) = &listing.incomplete {
        println!("WARNING: listing incomplete: {}", reason);
    }
    let entries = listing.records.len();
    let files = regular_files(listing.records);
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();

    for file in &files {
        println!(
            "{}\t{}\t{}",
            file.path,
            format_bytes(file.size),
            sorter::destination(file).display()
        );
    }
    println!(
        "{} files ({}) in {} entries",
        files.len(),
        format_bytes(total_bytes),
        entries
    );
    Ok(())
}

async fn run_backup(
    client: Arc<AdbClient>,
    options: BackupOptions,
    events: &EventBus,
    shutdown: &ShutdownCoordinator,
) -> Result<()> {
    let summary = backup::run_backup(client, options, events, shutdown.token()).await?;

    println!(
        "Backup {}: {} transferred ({}), {} skipped, {} failed in {}",
        if summary.cancelled { "cancelled" } else { "complete" },
        summary.transferred_files,
        format_bytes(summary.transferred_bytes),
        summary.skipped_files,
        summary.failed_files,
        format_duration(summary.duration_secs)
    );
    for (path, reason) in &summary.failures {
        println!("  {}: {}", path, reason);
    }

    if summary.cancelled {
        bail!("backup cancelled");
    }
    Ok(())
}

async fn run_restore(
    client: Arc<AdbClient>,
    options: RestoreOptions,
    yes: bool,
    events: &EventBus,
    shutdown: &ShutdownCoordinator,
) -> Result<()> {
    let mode = backup::plan_restore(&options)?;

    let question = match &mode {
        RestoreMode::Manifest { entries } => format!(
            "Restore {} files from {} to their original locations?",
            entries.len(),
            options.backup_root.display()
        ),
        RestoreMode::Directory { remote } => format!(
            "No manifest in {}. Push the whole directory to {}?",
            options.backup_root.display(),
            remote
        ),
    };
    if !yes && !confirm(&question).await? {
        println!("Restore aborted");
        return Ok(());
    }

    let summary = backup::run_restore(client, options, mode, events, shutdown.token()).await?;

    println!(
        "Restore {}: {} restored, {} failed in {}",
        if summary.cancelled { "cancelled" } else { "complete" },
        summary.restored_files,
        summary.failed_files,
        format_duration(summary.duration_secs)
    );
    for (path, reason) in &summary.failures {
        println!("  {}: {}", path, reason);
    }

    if summary.cancelled {
        bail!("restore cancelled");
    }
    Ok(())
}

async fn run_gallery(root: &Path, events: &EventBus, shutdown: &ShutdownCoordinator) -> Result<()> {
    let summary = gallery::generate_gallery(root, events, shutdown.token()).await?;

    match &summary.index_path {
        Some(index) => println!(
            "Gallery: {} items ({} new thumbnails, {} placeholders) in {}, open {}",
            summary.items,
            summary.thumbnails_created,
            summary.placeholders,
            format_duration(summary.duration_secs),
            index.display()
        ),
        None => bail!("gallery cancelled"),
    }
    Ok(())
}

async fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;

    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<ProgressEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(ProgressEvent::FileCompleted {
                source_path,
                processed,
                total,
                ..
            }) => println!("[{}/{}] OK   {}", processed, total, source_path),
            Ok(ProgressEvent::FileSkipped {
                source_path,
                processed,
                total,
                ..
            }) => println!("[{}/{}] SKIP {}", processed, total, source_path),
            Ok(ProgressEvent::FileFailed {
                source_path,
                error,
                processed,
                total,
                ..
            }) => println!("[{}/{}] FAIL {}: {}", processed, total, source_path, error),
            Ok(ProgressEvent::RestoreFile {
                original_path,
                error,
                processed,
                total,
                ..
            }) => match error {
                Some(error) => println!("[{}/{}] FAIL {}: {}", processed, total, original_path, error),
                None => println!("[{}/{}] OK   {}", processed, total, original_path),
            },
            Ok(ProgressEvent::GalleryItem {
                path, processed, total, ..
            }) => println!("[{}/{}] THUMB {}", processed, total, path),
            Ok(ProgressEvent::Warning { message, .. }) => println!("WARNING: {}", message),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => tracing::debug!("Event printer skipped {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}
