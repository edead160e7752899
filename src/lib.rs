//! fastav library crate
//!
//! Parallel virus scanning built around an external engine (`clamdscan`).
//! The CLI binary is a thin layer over [`scanner::Scanner`]; everything it
//! uses is available here for programmatic use.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod expander;
pub mod history;
pub mod logging;
pub mod output;
pub mod pool;
pub mod progress;
pub mod report;
pub mod scan_events;
pub mod scanner;
pub mod theme;
pub mod update;
pub mod utils;

pub use engine::{ClamdScan, ScanEngine, Verdict};
pub use error::ScanError;
pub use report::{ScanReport, ThreatRecord};
pub use scan_events::{EventSink, ScanEvent};
pub use scanner::{ScanState, Scanner, ScannerBuilder};
