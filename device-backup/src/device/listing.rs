//! Parser for toybox `ls -R -l` output.
//!
//! ```text
//! /sdcard/DCIM:
//! total 16
//! drwxrwx--x 3 root sdcard_rw 4096 2024-01-01 10:00 Camera
//! -rw-rw---- 1 root sdcard_rw  123 2024-01-01 10:00 file name.txt
//!
//! /sdcard/DCIM/Camera:
//! ...
//! ```
//!
//! Parsing is lenient: anything that does not look like an entry is skipped,
//! since listings routinely contain permission-denied noise.

use serde::{Deserialize, Serialize};

/// A single entry listed on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path on the device
    pub path: String,

    /// Size in bytes (0 when the listing did not give a number)
    pub size: u64,

    /// `YYYY-MM-DD HH:MM`, device clock
    pub timestamp: String,

    pub is_dir: bool,
}

impl FileRecord {
    /// Last path component
    pub fn name(&self) -> &str {
        remote_basename(&self.path)
    }
}

/// Parse a recursive listing into records, in line order.
///
/// `root` is the directory the listing was requested for; it applies to any
/// entries that appear before the first `/path:` header.
pub fn parse_listing(output: &str, root: &str) -> Vec<FileRecord> {
    let mut records = Vec::new();
    let mut current_dir = root.to_string();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') && line.ends_with(':') {
            current_dir = line[..line.len() - 1].to_string();
            continue;
        }

        if line.starts_with("total ") {
            continue;
        }

        if let Some(record) = parse_entry(line, &current_dir) {
            records.push(record);
        }
    }

    records
}

/// perms links owner group size date time name...
fn parse_entry(line: &str, dir: &str) -> Option<FileRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }

    let perms = fields[0];
    if !perms.starts_with(['-', 'd', 'l']) {
        return None;
    }
    let is_dir = perms.starts_with('d');

    // Owner/group columns vary between Android versions, so anchor on the date.
    let date_idx = fields.iter().position(|f| is_date_field(f))?;
    if date_idx == 0 || date_idx + 2 >= fields.len() {
        return None;
    }

    let size = fields[date_idx - 1].parse::<u64>().unwrap_or(0);
    let timestamp = format!("{} {}", fields[date_idx], fields[date_idx + 1]);

    let mut name = fields[date_idx + 2..].join(" ");
    if perms.starts_with('l') {
        if let Some((link, _target)) = name.split_once(" -> ") {
            name = link.to_string();
        }
    }

    if name == "." || name == ".." {
        return None;
    }

    Some(FileRecord {
        path: join_remote(dir, &name),
        size,
        timestamp,
        is_dir,
    })
}

/// `YYYY-MM-DD`: ten characters, two dashes, leading digit.
fn is_date_field(field: &str) -> bool {
    field.len() == 10
        && field.matches('-').count() == 2
        && field.as_bytes()[0].is_ascii_digit()
}

/// Join with `/` regardless of the local platform separator.
pub fn join_remote(dir: &str, name: &str) -> String {
    let dir = if dir.len() > 1 {
        dir.trim_end_matches('/')
    } else {
        dir
    };
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Last `/`-separated component of a device path.
pub fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
