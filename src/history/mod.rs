//! Scan history persistence
//!
//! The orchestrator only sees [`ScanStore`]; [`HistoryDb`] is the SQLite
//! implementation the CLI uses, which also answers the history queries.

pub mod database;

pub use database::HistoryDb;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Final counters written when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTotals {
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    pub threats_found: u64,
    pub duration_secs: u64,
}

/// Where scan records go. Called concurrently from scan workers.
pub trait ScanStore: Send + Sync {
    /// Create a record for a new session and return its id
    fn create_scan_record(&self, scan_path: &str) -> Result<i64>;

    fn record_threat(&self, scan_id: i64, path: &Path, signature: &str, size_bytes: u64) -> Result<()>;

    fn finalize_scan_record(&self, scan_id: i64, totals: &ScanTotals) -> Result<()>;
}

/// One row of `scan_history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub scan_date: DateTime<Utc>,
    pub scan_path: String,
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    pub threats_found: u64,
    pub duration_secs: u64,
}

/// A threat as stored for a past scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredThreat {
    pub id: i64,
    pub file_path: PathBuf,
    pub virus_name: String,
    pub file_size: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub detection_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDetails {
    pub entry: HistoryEntry,
    pub threats: Vec<StoredThreat>,
}

/// Aggregates over every recorded scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTotals {
    pub total_scans: u64,
    pub total_files: u64,
    pub total_bytes: u64,
    pub total_threats: u64,
}
