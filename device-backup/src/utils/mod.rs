//! Utility modules for device backups.

pub mod errors;
pub mod logger;
pub mod shutdown;

pub use errors::{BackupError, Result};
