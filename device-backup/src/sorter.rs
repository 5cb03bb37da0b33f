//! Destination layout: `<Year>/<Month>/<basename>`.
//!
//! The date comes from the file name when it carries one (camera and
//! messenger apps embed it), otherwise from the listing timestamp.

use crate::device::FileRecord;
use chrono::{Datelike, NaiveDateTime};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Folder pair for files without any usable date
pub const UNKNOWN_YEAR: &str = "Unknown_Date";
pub const UNKNOWN_MONTH: &str = "Misc";

/// Layout of [`FileRecord::timestamp`]
const LISTING_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// `2024-01-15`, `2024_01_15`
fn separated_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(20\d{2})[-_](0[1-9]|1[0-2])[-_](0[1-9]|[12]\d|3[01])").expect("valid regex")
    })
}

/// `20240115`
fn compact_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(20\d{2})(0[1-9]|1[0-2])(0[1-9]|[12]\d|3[01])").expect("valid regex")
    })
}

/// Relative destination for a device file.
///
/// Two files with the same name and the same derived month map to the same
/// destination; the later transfer overwrites the earlier one.
pub fn destination(record: &FileRecord) -> PathBuf {
    let name = record.name();
    let (year, month) = date_from_name(name)
        .or_else(|| date_from_timestamp(&record.timestamp))
        .unwrap_or_else(|| (UNKNOWN_YEAR.to_string(), UNKNOWN_MONTH.to_string()));

    PathBuf::from(year).join(month).join(name)
}

/// Year and month embedded in a file name, separated form first.
pub fn date_from_name(name: &str) -> Option<(String, String)> {
    [separated_date(), compact_date()]
        .into_iter()
        .find_map(|re| re.captures(name))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

fn date_from_timestamp(timestamp: &str) -> Option<(String, String)> {
    let parsed = NaiveDateTime::parse_from_str(timestamp, LISTING_TIMESTAMP_FORMAT).ok()?;
    Some((parsed.year().to_string(), format!("{:02}", parsed.month())))
}
