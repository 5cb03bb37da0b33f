//! Device Backup Library
//!
//! Backs up files from an Android device over adb into a date-sorted local
//! tree, skipping files that are already there, and restores them using the
//! manifest written alongside the backup.

pub mod backup;
pub mod config;
pub mod dedup;
pub mod device;
pub mod events;
pub mod fs;
pub mod gallery;
pub mod sorter;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
