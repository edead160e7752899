//! Scan report - the finalized, read-only result of a session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub path: PathBuf,
    pub signature: String,
    pub size_bytes: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub detected_at: DateTime<Utc>,
}

impl ThreatRecord {
    pub fn new(path: &Path, signature: &str, size_bytes: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            signature: signature.to_string(),
            size_bytes,
            detected_at: Utc::now(),
        }
    }
}

/// Finalized snapshot of a scan session.
///
/// Threats are kept in detection order, which depends on worker scheduling
/// and differs between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub session_id: i64,
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    threats: Vec<ThreatRecord>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub finished_at: DateTime<Utc>,
    pub duration_secs: u64,
    /// True when the session was stopped before every file was scanned
    pub cancelled: bool,
}

impl ScanReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: i64,
        files_scanned: u64,
        bytes_scanned: u64,
        threats: Vec<ThreatRecord>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration_secs: u64,
        cancelled: bool,
    ) -> Self {
        Self {
            session_id,
            files_scanned,
            bytes_scanned,
            threats,
            started_at,
            finished_at,
            duration_secs,
            cancelled,
        }
    }

    pub fn threats(&self) -> &[ThreatRecord] {
        &self.threats
    }

    pub fn threat_count(&self) -> usize {
        self.threats.len()
    }

    pub fn has_threats(&self) -> bool {
        !self.threats.is_empty()
    }

    /// Bytes held by infected files
    pub fn infected_bytes(&self) -> u64 {
        self.threats.iter().map(|t| t.size_bytes).sum()
    }
}

/// Signature text for display; the engine occasionally gives none
pub fn display_signature(signature: &str) -> &str {
    if signature.is_empty() {
        "Unknown"
    } else {
        signature
    }
}
