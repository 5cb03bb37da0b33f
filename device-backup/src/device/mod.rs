//! Everything that talks to the device.
//!
//! The rest of the crate only sees [`CommandExecutor`]; [`adb::AdbClient`] is
//! the production implementation and tests plug in their own.

pub mod adb;
pub mod listing;
pub mod walker;

use std::future::Future;
use std::path::Path;

pub use listing::{parse_listing, FileRecord};

/// Shell-level access to the device filesystem.
///
/// Every call is an independent command, so implementations must be safe to
/// call from many workers at once.
pub trait CommandExecutor: Send + Sync + 'static {
    /// Raw `ls -R -l` output for `path`. A failed command that still printed
    /// something reports it through [`crate::BackupError::partial_output`].
    fn list_recursive(&self, path: &str) -> impl Future<Output = crate::Result<String>> + Send;

    /// Copy a local file or directory onto the device.
    fn push(&self, local: &Path, remote: &str) -> impl Future<Output = crate::Result<()>> + Send;

    /// Copy a device file to a local path.
    fn pull(&self, remote: &str, local: &Path) -> impl Future<Output = crate::Result<()>> + Send;
}

#[cfg(test)]
pub(crate) mod mock;
