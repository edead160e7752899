//! Error taxonomy for scan sessions and per-file invocations

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the scan orchestrator and the external scan invoker.
///
/// Per-file variants (`InvocationTimeout`, `InvocationError`) travel inside a
/// [`Verdict`](crate::engine::Verdict) and never abort a scan. Session-level
/// variants are returned from [`Scanner::start_scan`](crate::scanner::Scanner::start_scan).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    AlreadyScanning,

    #[error("no files to scan")]
    NoFilesFound,

    #[error("cannot create scan record: {0}")]
    SessionCreateFailed(String),

    #[error("scan engine timed out after {}s", .0.as_secs())]
    InvocationTimeout(Duration),

    #[error("scan engine failed: {0}")]
    InvocationError(String),

    #[error("history write failed: {0}")]
    PersistenceError(String),
}

impl ScanError {
    /// True for failures that belong to a single file rather than the session
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            ScanError::InvocationTimeout(_) | ScanError::InvocationError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_reports_seconds() {
        let err = ScanError::InvocationTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "scan engine timed out after 60s");
    }

    #[test]
    fn test_per_file_classification() {
        assert!(ScanError::InvocationTimeout(Duration::from_secs(1)).is_per_file());
        assert!(ScanError::InvocationError("exit 2".into()).is_per_file());
        assert!(!ScanError::NoFilesFound.is_per_file());
        assert!(!ScanError::AlreadyScanning.is_per_file());
    }
}
