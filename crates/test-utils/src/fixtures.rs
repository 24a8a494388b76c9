//! Common test fixtures: days, timestamps and temporary archives.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

/// A calendar day. Panics on an invalid date (test-only helper).
pub fn day(year: i32, month: u32, dom: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, dom).expect("valid test date")
}

/// Consecutive days starting at `first`.
pub fn days_from(first: NaiveDate, count: usize) -> Vec<NaiveDate> {
    first.iter_days().take(count).collect()
}

/// Timestamps of `day` at each of `hours` (UTC).
pub fn day_timestamps(day: NaiveDate, hours: &[u32]) -> Vec<DateTime<Utc>> {
    hours
        .iter()
        .map(|h| {
            Utc.from_utc_datetime(&day.and_hms_opt(*h, 0, 0).expect("valid test hour"))
        })
        .collect()
}

/// A temporary directory laid out for an archive, a raw-data drop directory
/// and a ledger database. Removed on drop.
pub struct TempArchive {
    dir: TempDir,
}

impl TempArchive {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("raw")).expect("Failed to create raw dir");
        Self { dir }
    }

    /// Base of the temporary tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Archive root.
    pub fn archive_root(&self) -> PathBuf {
        self.dir.path().join("archive.zarr")
    }

    /// Directory where raw daily stores are dropped.
    pub fn raw_dir(&self) -> PathBuf {
        self.dir.path().join("raw")
    }

    /// Ledger database file.
    pub fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("ledger.db")
    }
}

impl Default for TempArchive {
    fn default() -> Self {
        Self::new()
    }
}
