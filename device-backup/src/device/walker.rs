//! Recursive listing of a device directory.

use super::{parse_listing, CommandExecutor, FileRecord};
use tracing::{debug, warn};

/// Entries listed below a device directory
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub records: Vec<FileRecord>,
    /// Set when the listing command failed part way; `records` then holds
    /// only what it printed before failing
    pub incomplete: Option<String>,
}

/// List everything below `root` on the device.
///
/// A listing command that fails after printing output (typically
/// permission-denied on some subtree) still yields the entries it printed.
pub async fn walk<E: CommandExecutor>(executor: &E, root: &str) -> crate::Result<DeviceListing> {
    let (output, incomplete) = match executor.list_recursive(root).await {
        Ok(output) => (output, None),
        Err(e) => match e.partial_output() {
            Some(partial) => {
                warn!("Listing of {} was incomplete, using partial output: {}", root, e);
                (partial.to_string(), Some(e.to_string()))
            }
            None => return Err(e),
        },
    };

    let records = parse_listing(&output, root);
    debug!("Listed {} entries under {}", records.len(), root);
    Ok(DeviceListing {
        records,
        incomplete,
    })
}

/// Drop directories, keeping only entries that can be transferred.
pub fn regular_files(records: Vec<FileRecord>) -> Vec<FileRecord> {
    records.into_iter().filter(|r| !r.is_dir).collect()
}
