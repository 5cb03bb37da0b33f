//! Configuration management for device backups.
//!
//! Loads configuration from a TOML file; every field has a default so a
//! partial file (or no file at all) is valid. CLI flags override both.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Explicit adb executable (searched on PATH when unset)
    #[serde(default)]
    pub adb_path: Option<PathBuf>,

    /// Device serial passed as `adb -s` (first device when unset)
    #[serde(default)]
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory on the device to back up
    #[serde(default = "default_source")]
    pub source: String,

    /// Local backup root
    #[serde(default = "default_destination")]
    pub destination: PathBuf,

    #[serde(default = "default_backup_workers")]
    pub workers: usize,

    #[serde(default = "default_backup_queue")]
    pub queue_capacity: usize,

    /// Per-file timeout in seconds (0 disables it)
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default = "default_restore_workers")]
    pub workers: usize,

    #[serde(default = "default_restore_queue")]
    pub queue_capacity: usize,

    /// Per-file timeout in seconds (0 disables it)
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Where a backup without a manifest is pushed as a whole
    #[serde(default = "default_fallback_remote")]
    pub fallback_remote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_source() -> String {
    "/sdcard/DCIM".to_string()
}

fn default_destination() -> PathBuf {
    PathBuf::from("backup")
}

fn default_backup_workers() -> usize {
    5
}

fn default_backup_queue() -> usize {
    100
}

fn default_restore_workers() -> usize {
    10
}

fn default_restore_queue() -> usize {
    500
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_fallback_remote() -> String {
    "/sdcard/Restored".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            destination: default_destination(),
            workers: default_backup_workers(),
            queue_capacity: default_backup_queue(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            workers: default_restore_workers(),
            queue_capacity: default_restore_queue(),
            job_timeout_secs: default_job_timeout_secs(),
            fallback_remote: default_fallback_remote(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BackupConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.job_timeout_secs)
    }
}

impl RestoreConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.job_timeout_secs)
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pools cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.backup.workers == 0 || self.restore.workers == 0 {
            return Err(crate::BackupError::Config(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.backup.queue_capacity == 0 || self.restore.queue_capacity == 0 {
            return Err(crate::BackupError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
