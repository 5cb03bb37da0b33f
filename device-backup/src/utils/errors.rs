//! Custom error types for device backups.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("adb not available: {0}")]
    AdbUnavailable(String),

    #[error("No device connected")]
    NoDevice,

    /// A device command exited unsuccessfully. `stdout` keeps whatever the
    /// command printed before failing so partial listings can still be used.
    #[error("Device command `{command}` failed: {message}")]
    Command {
        command: String,
        message: String,
        stdout: String,
    },

    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    #[error("Timed out after {secs}s: {path}")]
    Timeout { path: String, secs: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Registry scan failed for {path}: {reason}")]
    RegistryScan { path: String, reason: String },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Gallery error: {0}")]
    Gallery(String),
}

impl BackupError {
    /// Output produced by a failed device command, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            BackupError::Command { stdout, .. } if !stdout.is_empty() => Some(stdout),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
