//! Run counters kept by the result collector.

use super::Outcome;
use std::time::{Duration, Instant};

/// Running totals for a backup or restore
#[derive(Debug, Clone)]
pub struct RunProgress {
    start_time: Instant,

    /// Jobs expected in this run
    pub total_files: usize,

    pub completed_files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,

    /// Bytes actually moved (skips excluded)
    pub transferred_bytes: u64,
}

impl RunProgress {
    pub fn new(total_files: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_files,
            completed_files: 0,
            skipped_files: 0,
            failed_files: 0,
            transferred_bytes: 0,
        }
    }

    /// Count one finished job
    pub fn record(&mut self, outcome: &Outcome, size: u64) {
        match outcome {
            Outcome::Completed => {
                self.completed_files += 1;
                self.transferred_bytes += size;
            }
            Outcome::Skipped => self.skipped_files += 1,
            Outcome::Failed(_) => self.failed_files += 1,
        }
    }

    /// Jobs with a result so far
    pub fn processed(&self) -> usize {
        self.completed_files + self.skipped_files + self.failed_files
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_files == 0 {
            100.0
        } else {
            (self.processed() as f64 / self.total_files as f64 * 100.0).min(100.0)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed() >= self.total_files
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
