//! Result aggregation shared by all scan workers
//!
//! Every mutation happens under one lock, so a worker's count, byte total
//! and threat record land together. Readers get values that were true at the
//! moment of the call; two separate reads may come from different instants.

use crate::report::ThreatRecord;
use parking_lot::Mutex;
use std::path::Path;

/// Counters for a session at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total_files: u64,
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    pub threats_found: u64,
}

/// What a successful [`ResultAggregator::record`] produced
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Files scanned so far, including this one
    pub files_scanned: u64,
    pub total_files: u64,
    /// Present when the file was infected
    pub threat: Option<ThreatRecord>,
}

impl Recorded {
    pub fn is_last(&self) -> bool {
        self.files_scanned == self.total_files
    }
}

#[derive(Debug, Default)]
struct Tally {
    totals: Counters,
    threats: Vec<ThreatRecord>,
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    tally: Mutex<Tally>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything and set the file count for a new session
    pub fn reset(&self, total_files: u64) {
        let mut tally = self.tally.lock();
        tally.totals = Counters {
            total_files,
            ..Counters::default()
        };
        tally.threats.clear();
    }

    /// Record one finished file.
    ///
    /// `signature` is `Some` for infected files. Returns `None` without
    /// touching anything if the session already holds `total_files` results.
    pub fn record(&self, path: &Path, size_bytes: u64, signature: Option<&str>) -> Option<Recorded> {
        let mut tally = self.tally.lock();
        if tally.totals.files_scanned >= tally.totals.total_files {
            return None;
        }

        tally.totals.files_scanned += 1;
        tally.totals.bytes_scanned += size_bytes;

        let threat = signature.map(|sig| {
            let record = ThreatRecord::new(path, sig, size_bytes);
            tally.totals.threats_found += 1;
            tally.threats.push(record.clone());
            record
        });

        Some(Recorded {
            files_scanned: tally.totals.files_scanned,
            total_files: tally.totals.total_files,
            threat,
        })
    }

    pub fn snapshot(&self) -> Counters {
        self.tally.lock().totals
    }

    /// Threats in detection order
    pub fn threats(&self) -> Vec<ThreatRecord> {
        self.tally.lock().threats.clone()
    }

    /// Counters and threats taken under the same lock
    pub fn snapshot_with_threats(&self) -> (Counters, Vec<ThreatRecord>) {
        let tally = self.tally.lock();
        (tally.totals, tally.threats.clone())
    }

    pub fn files_scanned(&self) -> u64 {
        self.tally.lock().totals.files_scanned
    }

    pub fn bytes_scanned(&self) -> u64 {
        self.tally.lock().totals.bytes_scanned
    }

    pub fn threats_found(&self) -> u64 {
        self.tally.lock().totals.threats_found
    }

    pub fn total_files(&self) -> u64 {
        self.tally.lock().totals.total_files
    }
}
