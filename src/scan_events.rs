//! Notifications emitted while a scan runs (consumed by the CLI progress view)

use crate::report::ScanReport;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Paths were expanded and the session record exists
    Started { session_id: i64, total_files: u64 },

    /// One file finished. `signature` is empty unless infected.
    FileScanned {
        path: PathBuf,
        infected: bool,
        signature: String,
        error: Option<String>,
    },

    Progress { scanned: u64, total: u64 },

    /// Emitted once per session that ran to the end
    Completed(ScanReport),

    Error { message: String },
}

/// Receives scan events.
///
/// Called from worker and coordinator threads. Implementations must not call
/// back into the scanner from `emit`.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ScanEvent) {}
}

impl EventSink for crossbeam_channel::Sender<ScanEvent> {
    fn emit(&self, event: ScanEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}

impl<F> EventSink for F
where
    F: Fn(ScanEvent) + Send + Sync,
{
    fn emit(&self, event: ScanEvent) {
        self(event)
    }
}
