//! Scan orchestration
//!
//! A [`Scanner`] runs one session at a time: expand the roots, create the
//! history record, hand every file to the worker pool and collect results as
//! workers report them. The worker whose result brings the count to the total
//! flips the state from Scanning to Finalizing; only that worker wins the swap,
//! and it passes finalization to a coordinator thread so no pool thread ever
//! waits on the pool.
//!
//! Lifecycle changes (`start_scan`, `stop_scan`, the last step of
//! finalization) serialize on one mutex. Result reporting never takes it.

use crate::aggregator::ResultAggregator;
use crate::engine::{ScanEngine, Verdict};
use crate::error::ScanError;
use crate::expander::{describe_roots, PathExpander};
use crate::history::{ScanStore, ScanTotals};
use crate::pool::WorkerPool;
use crate::report::ScanReport;
use crate::scan_events::{EventSink, NullSink, ScanEvent};
use crate::utils::round_secs;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use globset::GlobSet;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Expanding = 1,
    Scanning = 2,
    Finalizing = 3,
    Completed = 4,
    Cancelled = 5,
    Failed = 6,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanState::Expanding,
            2 => ScanState::Scanning,
            3 => ScanState::Finalizing,
            4 => ScanState::Completed,
            5 => ScanState::Cancelled,
            6 => ScanState::Failed,
            _ => ScanState::Idle,
        }
    }

    /// States from which a new session may start
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanState::Idle | ScanState::Completed | ScanState::Cancelled | ScanState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Expanding => "expanding",
            ScanState::Scanning => "scanning",
            ScanState::Finalizing => "finalizing",
            ScanState::Completed => "completed",
            ScanState::Cancelled => "cancelled",
            ScanState::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Control {
    Finalize { session_id: i64 },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    id: i64,
    started_at: DateTime<Utc>,
    started: Instant,
}

struct Shared {
    state: AtomicU8,
    lifecycle: Mutex<()>,
    session: Mutex<Option<Session>>,
    /// Highest count sent in a Progress event this session
    progress: Mutex<u64>,
    aggregator: ResultAggregator,
    pool: WorkerPool,
    expander: PathExpander,
    engine: Arc<dyn ScanEngine>,
    store: Arc<dyn ScanStore>,
    sink: Arc<dyn EventSink>,
    control: Sender<Control>,
}

impl Shared {
    fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ScanState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn session(&self) -> Option<Session> {
        *self.session.lock()
    }

    fn emit_error(&self, message: impl Into<String>) {
        self.sink.emit(ScanEvent::Error {
            message: message.into(),
        });
    }

    fn fail(&self, err: ScanError) -> ScanError {
        self.set_state(ScanState::Failed);
        tracing::warn!("scan failed to start: {}", err);
        self.emit_error(err.to_string());
        err
    }

    fn start_scan(self: &Arc<Self>, roots: &[PathBuf]) -> Result<i64, ScanError> {
        // Reject early so a second caller never waits behind a long expansion
        if !self.state().is_terminal() {
            self.emit_error(ScanError::AlreadyScanning.to_string());
            return Err(ScanError::AlreadyScanning);
        }

        let _lifecycle = self.lifecycle.lock();
        if !self.state().is_terminal() {
            self.emit_error(ScanError::AlreadyScanning.to_string());
            return Err(ScanError::AlreadyScanning);
        }

        let started_at = Utc::now();
        let started = Instant::now();
        self.set_state(ScanState::Expanding);
        self.aggregator.reset(0);
        *self.session.lock() = None;
        *self.progress.lock() = 0;

        let files = self.expander.expand(roots);
        if files.is_empty() {
            return Err(self.fail(ScanError::NoFilesFound));
        }

        let session_id = match self.store.create_scan_record(&describe_roots(roots)) {
            Ok(id) => id,
            Err(e) => return Err(self.fail(ScanError::SessionCreateFailed(format!("{:#}", e)))),
        };

        let total = files.len() as u64;
        self.aggregator.reset(total);
        *self.session.lock() = Some(Session {
            id: session_id,
            started_at,
            started,
        });

        self.set_state(ScanState::Scanning);
        tracing::info!(session_id, total_files = total, "scan started");
        self.sink.emit(ScanEvent::Started {
            session_id,
            total_files: total,
        });

        for path in files {
            let task = ScanTask {
                path,
                scanner: Arc::clone(self),
            };
            self.pool.execute(move || task.run());
        }

        Ok(session_id)
    }

    fn report_result(&self, path: &Path, verdict: &Verdict, size_bytes: u64) {
        if self.state() != ScanState::Scanning {
            return;
        }
        let Some(session) = self.session() else {
            return;
        };

        let signature = verdict.is_infected().then(|| verdict.signature());
        let Some(recorded) = self.aggregator.record(path, size_bytes, signature) else {
            return;
        };

        if let Some(ref threat) = recorded.threat {
            tracing::info!(path = %path.display(), signature = %threat.signature, "threat detected");
            if let Err(e) =
                self.store
                    .record_threat(session.id, &threat.path, &threat.signature, threat.size_bytes)
            {
                tracing::warn!("could not persist threat for {}: {:#}", path.display(), e);
            }
        }

        let error = verdict.error().map(|e| e.to_string());
        if let Some(ref message) = error {
            tracing::debug!(path = %path.display(), "{}", message);
        }

        self.sink.emit(ScanEvent::FileScanned {
            path: path.to_path_buf(),
            infected: verdict.is_infected(),
            signature: verdict.signature().to_string(),
            error,
        });
        self.emit_progress(recorded.files_scanned, recorded.total_files);

        if recorded.is_last() && self.try_begin_finalize() {
            if self
                .control
                .send(Control::Finalize {
                    session_id: session.id,
                })
                .is_err()
            {
                tracing::warn!(session_id = session.id, "coordinator gone, scan left unfinished");
            }
        }
    }

    /// Progress never moves backwards; a worker that lost the race to a
    /// later count drops its event.
    fn emit_progress(&self, scanned: u64, total: u64) {
        let mut last = self.progress.lock();
        if scanned <= *last {
            return;
        }
        *last = scanned;
        self.sink.emit(ScanEvent::Progress { scanned, total });
    }

    fn try_begin_finalize(&self) -> bool {
        self.state
            .compare_exchange(
                ScanState::Scanning as u8,
                ScanState::Finalizing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Runs on the coordinator thread
    fn finalize(&self, session_id: i64) {
        self.pool.wait_for_done();

        let _lifecycle = self.lifecycle.lock();
        let Some(session) = self.session() else {
            return;
        };
        // A stop (or a newer session) got here first
        if session.id != session_id || self.state() != ScanState::Finalizing {
            return;
        }

        let report = self.build_report(&session, false);
        self.persist_totals(&report);

        tracing::info!(
            session_id,
            files = report.files_scanned,
            threats = report.threat_count(),
            duration_secs = report.duration_secs,
            "scan completed"
        );
        self.sink.emit(ScanEvent::Completed(report));
        self.set_state(ScanState::Completed);
    }

    fn stop_scan(&self) -> Option<ScanReport> {
        let _lifecycle = self.lifecycle.lock();
        if self.state().is_terminal() {
            return None;
        }

        self.set_state(ScanState::Cancelled);
        self.pool.clear();
        self.pool.wait_for_done();

        let session = self.session()?;
        let report = self.build_report(&session, true);
        self.persist_totals(&report);

        tracing::info!(
            session_id = session.id,
            files = report.files_scanned,
            "scan cancelled"
        );
        Some(report)
    }

    fn build_report(&self, session: &Session, cancelled: bool) -> ScanReport {
        let (counters, threats) = self.aggregator.snapshot_with_threats();
        ScanReport::new(
            session.id,
            counters.files_scanned,
            counters.bytes_scanned,
            threats,
            session.started_at,
            Utc::now(),
            round_secs(session.started.elapsed()),
            cancelled,
        )
    }

    fn persist_totals(&self, report: &ScanReport) {
        let totals = ScanTotals {
            files_scanned: report.files_scanned,
            bytes_scanned: report.bytes_scanned,
            threats_found: report.threat_count() as u64,
            duration_secs: report.duration_secs,
        };
        if let Err(e) = self.store.finalize_scan_record(report.session_id, &totals) {
            tracing::warn!(session_id = report.session_id, "could not save scan totals: {:#}", e);
            self.emit_error(ScanError::PersistenceError(format!("{:#}", e)).to_string());
        }
    }
}

/// One file waiting for a worker
struct ScanTask {
    path: PathBuf,
    scanner: Arc<Shared>,
}

impl ScanTask {
    fn run(self) {
        // The session may have been stopped while this task sat in the queue
        if self.scanner.state() != ScanState::Scanning {
            return;
        }
        let size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let verdict = self.scanner.engine.scan_file(&self.path);
        self.scanner.report_result(&self.path, &verdict, size);
    }
}

fn run_coordinator(shared: Weak<Shared>, control: Receiver<Control>) {
    while let Ok(msg) = control.recv() {
        match msg {
            Control::Finalize { session_id } => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.finalize(session_id);
            }
            Control::Shutdown => break,
        }
    }
}

/// Concurrent scan orchestrator
pub struct Scanner {
    shared: Arc<Shared>,
    coordinator: Option<JoinHandle<()>>,
}

impl Scanner {
    pub fn builder(engine: Arc<dyn ScanEngine>, store: Arc<dyn ScanStore>) -> ScannerBuilder {
        ScannerBuilder::new(engine, store)
    }

    /// Start a session over `roots` and return its id.
    ///
    /// Returns as soon as every file is queued; results arrive through the
    /// event sink.
    pub fn start_scan<P: AsRef<Path>>(&self, roots: &[P]) -> Result<i64, ScanError> {
        let roots: Vec<PathBuf> = roots.iter().map(|p| p.as_ref().to_path_buf()).collect();
        self.shared.start_scan(&roots)
    }

    /// Record the outcome for one file. Ignored unless a session is scanning.
    pub fn report_result(&self, path: &Path, verdict: &Verdict, size_bytes: u64) {
        self.shared.report_result(path, verdict, size_bytes);
    }

    /// Cancel the running session.
    ///
    /// Blocks until in-flight files finish, then returns the partial report.
    /// Returns `None` if nothing was running.
    pub fn stop_scan(&self) -> Option<ScanReport> {
        self.shared.stop_scan()
    }

    pub fn state(&self) -> ScanState {
        self.shared.state()
    }

    pub fn is_scanning(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn files_scanned(&self) -> u64 {
        self.shared.aggregator.files_scanned()
    }

    pub fn bytes_scanned(&self) -> u64 {
        self.shared.aggregator.bytes_scanned()
    }

    pub fn threats_found(&self) -> u64 {
        self.shared.aggregator.threats_found()
    }

    pub fn total_files(&self) -> u64 {
        self.shared.aggregator.total_files()
    }

    /// Id of the current or most recent session
    pub fn session_id(&self) -> Option<i64> {
        self.shared.session().map(|s| s.id)
    }

    pub fn num_workers(&self) -> usize {
        self.shared.pool.num_workers()
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.shared.stop_scan();
        let _ = self.shared.control.send(Control::Shutdown);
        if let Some(handle) = self.coordinator.take() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .field("files_scanned", &self.files_scanned())
            .field("total_files", &self.total_files())
            .finish()
    }
}

/// Builder for [`Scanner`]
pub struct ScannerBuilder {
    engine: Arc<dyn ScanEngine>,
    store: Arc<dyn ScanStore>,
    sink: Arc<dyn EventSink>,
    workers: usize,
    exclusions: Option<GlobSet>,
}

impl ScannerBuilder {
    pub fn new(engine: Arc<dyn ScanEngine>, store: Arc<dyn ScanStore>) -> Self {
        Self {
            engine,
            store,
            sink: Arc::new(NullSink),
            workers: 0,
            exclusions: None,
        }
    }

    /// Worker threads; 0 means one per available core
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_exclusions(mut self, exclusions: GlobSet) -> Self {
        self.exclusions = Some(exclusions);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<Scanner> {
        let pool = WorkerPool::new(self.workers)?;
        let expander = match self.exclusions {
            Some(set) => PathExpander::new().with_exclusions(set),
            None => PathExpander::new(),
        };
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            state: AtomicU8::new(ScanState::Idle as u8),
            lifecycle: Mutex::new(()),
            session: Mutex::new(None),
            progress: Mutex::new(0),
            aggregator: ResultAggregator::new(),
            pool,
            expander,
            engine: self.engine,
            store: self.store,
            sink: self.sink,
            control: control_tx,
        });

        let weak = Arc::downgrade(&shared);
        let coordinator = thread::Builder::new()
            .name("fastav-coordinator".to_string())
            .spawn(move || run_coordinator(weak, control_rx))
            .context("Failed to start scan coordinator thread")?;

        Ok(Scanner {
            shared,
            coordinator: Some(coordinator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryDb;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(20);

    struct FailingStore;

    impl ScanStore for FailingStore {
        fn create_scan_record(&self, _scan_path: &str) -> Result<i64> {
            anyhow::bail!("disk full")
        }

        fn record_threat(&self, _: i64, _: &Path, _: &str, _: u64) -> Result<()> {
            Ok(())
        }

        fn finalize_scan_record(&self, _: i64, _: &ScanTotals) -> Result<()> {
            Ok(())
        }
    }

    /// In-memory history with injectable slowness and write failures
    struct FlakyStore {
        db: HistoryDb,
        create_delay: Duration,
        fail_threats: bool,
        fail_finalize: bool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                db: HistoryDb::open_in_memory().unwrap(),
                create_delay: Duration::ZERO,
                fail_threats: false,
                fail_finalize: false,
            }
        }
    }

    impl ScanStore for FlakyStore {
        fn create_scan_record(&self, scan_path: &str) -> Result<i64> {
            thread::sleep(self.create_delay);
            self.db.create_scan_record(scan_path)
        }

        fn record_threat(&self, scan_id: i64, path: &Path, signature: &str, size: u64) -> Result<()> {
            if self.fail_threats {
                anyhow::bail!("database is locked");
            }
            self.db.record_threat(scan_id, path, signature, size)
        }

        fn finalize_scan_record(&self, scan_id: i64, totals: &ScanTotals) -> Result<()> {
            if self.fail_finalize {
                anyhow::bail!("database is locked");
            }
            self.db.finalize_scan_record(scan_id, totals)
        }
    }

    fn make_files(count: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        for i in 0..count {
            fs::write(dir.path().join(format!("file_{:04}.bin", i)), [0u8; 4]).unwrap();
        }
        dir
    }

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().to_string()
    }

    fn build(
        engine: impl ScanEngine + 'static,
        store: Arc<dyn ScanStore>,
        workers: usize,
    ) -> (Scanner, Receiver<ScanEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let scanner = Scanner::builder(Arc::new(engine), store)
            .with_workers(workers)
            .with_event_sink(Arc::new(tx))
            .build()
            .unwrap();
        (scanner, rx)
    }

    /// Collect events until the completed report arrives
    fn wait_completed(rx: &Receiver<ScanEvent>) -> (ScanReport, Vec<ScanEvent>) {
        let mut seen = Vec::new();
        loop {
            match rx.recv_timeout(WAIT).expect("scan did not complete") {
                ScanEvent::Completed(report) => return (report, seen),
                other => seen.push(other),
            }
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_infected_clean_and_timeout_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.exe"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("b.txt"), vec![0u8; 20]).unwrap();
        fs::write(dir.path().join("c.iso"), vec![0u8; 30]).unwrap();

        let engine = |path: &Path| match file_name(path).as_str() {
            "a.exe" => Verdict::Infected {
                signature: "Test.Virus".into(),
            },
            "c.iso" => Verdict::Error(ScanError::InvocationTimeout(Duration::from_secs(60))),
            _ => Verdict::Clean,
        };
        let db = Arc::new(HistoryDb::open_in_memory().unwrap());
        let (scanner, rx) = build(engine, db.clone(), 2);

        let id = scanner.start_scan(&[dir.path()]).unwrap();
        let (report, events) = wait_completed(&rx);

        assert_eq!(report.session_id, id);
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.bytes_scanned, 60);
        assert_eq!(report.threat_count(), 1);
        assert_eq!(report.threats()[0].signature, "Test.Virus");
        assert_eq!(report.infected_bytes(), 10);
        assert!(!report.cancelled);

        assert!(matches!(
            events.first(),
            Some(ScanEvent::Started { total_files: 3, .. })
        ));
        let timed_out = events.iter().find_map(|e| match e {
            ScanEvent::FileScanned { path, infected, error, .. } if file_name(path) == "c.iso" => {
                Some((*infected, error.clone()))
            }
            _ => None,
        });
        let (infected, error) = timed_out.unwrap();
        assert!(!infected);
        assert!(error.unwrap().contains("timed out"));

        wait_until(|| scanner.state() == ScanState::Completed);
        assert_eq!(scanner.threats_found(), 1);

        let details = db.scan_details(id).unwrap().unwrap();
        assert_eq!(details.entry.files_scanned, 3);
        assert_eq!(details.entry.bytes_scanned, 60);
        assert_eq!(details.entry.threats_found, 1);
        assert_eq!(details.threats.len(), 1);
    }

    #[test]
    fn test_single_completion_under_contention() {
        let dir = make_files(1000);
        for workers in [1, 2, 64] {
            let engine = |path: &Path| {
                if file_name(path).ends_with("7.bin") {
                    Verdict::Infected {
                        signature: "Stress.Sig".into(),
                    }
                } else {
                    Verdict::Clean
                }
            };
            let db = Arc::new(HistoryDb::open_in_memory().unwrap());
            let (scanner, rx) = build(engine, db, workers);
            scanner.start_scan(&[dir.path()]).unwrap();

            let (report, events) = wait_completed(&rx);
            let file_events = events
                .iter()
                .filter(|e| matches!(e, ScanEvent::FileScanned { .. }))
                .count();
            assert_eq!(file_events, 1000, "workers={}", workers);
            assert_eq!(report.files_scanned, 1000);
            assert_eq!(report.bytes_scanned, 4000);
            assert_eq!(report.threat_count(), 100);
            assert_eq!(scanner.threats_found(), report.threat_count() as u64);

            // No second completion may follow
            thread::sleep(Duration::from_millis(100));
            assert!(rx
                .try_iter()
                .all(|e| !matches!(e, ScanEvent::Completed(_))));
        }
    }

    #[test]
    fn test_cancel_freezes_counters() {
        let dir = make_files(50);
        let engine = |_: &Path| {
            thread::sleep(Duration::from_millis(20));
            Verdict::Clean
        };
        let db = Arc::new(HistoryDb::open_in_memory().unwrap());
        let (scanner, rx) = build(engine, db.clone(), 1);

        let id = scanner.start_scan(&[dir.path()]).unwrap();
        wait_until(|| scanner.files_scanned() >= 2);

        let report = scanner.stop_scan().unwrap();
        assert!(report.cancelled);
        assert!(report.files_scanned >= 2 && report.files_scanned < 50);
        assert_eq!(scanner.state(), ScanState::Cancelled);

        let frozen = (
            scanner.files_scanned(),
            scanner.bytes_scanned(),
            scanner.threats_found(),
        );
        assert_eq!(frozen.0, report.files_scanned);

        // Late results from workers that were already running
        for i in 0..50 {
            let verdict = Verdict::Infected {
                signature: "Late".into(),
            };
            scanner.report_result(&dir.path().join(format!("late_{}", i)), &verdict, 99);
        }
        assert_eq!(
            (
                scanner.files_scanned(),
                scanner.bytes_scanned(),
                scanner.threats_found()
            ),
            frozen
        );

        thread::sleep(Duration::from_millis(100));
        assert!(rx
            .try_iter()
            .all(|e| !matches!(e, ScanEvent::Completed(_))));

        let details = db.scan_details(id).unwrap().unwrap();
        assert_eq!(details.entry.files_scanned, report.files_scanned);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = make_files(20);
        let engine = |_: &Path| {
            thread::sleep(Duration::from_millis(10));
            Verdict::Clean
        };
        let (scanner, _rx) = build(engine, Arc::new(HistoryDb::open_in_memory().unwrap()), 1);

        assert!(scanner.stop_scan().is_none());
        assert_eq!(scanner.state(), ScanState::Idle);

        scanner.start_scan(&[dir.path()]).unwrap();
        assert!(scanner.stop_scan().is_some());
        assert!(scanner.stop_scan().is_none());
        assert_eq!(scanner.state(), ScanState::Cancelled);
    }

    #[test]
    fn test_stop_after_completion_keeps_completed() {
        let dir = make_files(3);
        let (scanner, rx) = build(
            |_: &Path| Verdict::Clean,
            Arc::new(HistoryDb::open_in_memory().unwrap()),
            2,
        );
        scanner.start_scan(&[dir.path()]).unwrap();
        wait_completed(&rx);
        wait_until(|| scanner.state() == ScanState::Completed);

        assert!(scanner.stop_scan().is_none());
        assert_eq!(scanner.state(), ScanState::Completed);
    }

    #[test]
    fn test_second_start_rejected_while_scanning() {
        let dir = make_files(4);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let engine = move |_: &Path| {
            // Blocks until the sender is dropped
            let _ = gate_rx.recv();
            Verdict::Clean
        };
        let (scanner, rx) = build(engine, Arc::new(HistoryDb::open_in_memory().unwrap()), 2);

        let first = scanner.start_scan(&[dir.path()]).unwrap();
        assert!(scanner.is_scanning());
        assert_eq!(
            scanner.start_scan(&[dir.path()]),
            Err(ScanError::AlreadyScanning)
        );
        assert_eq!(scanner.session_id(), Some(first));
        assert_eq!(scanner.state(), ScanState::Scanning);

        drop(gate_tx);
        let (report, events) = wait_completed(&rx);
        assert_eq!(report.session_id, first);
        assert!(events
            .iter()
            .any(|e| matches!(e, ScanEvent::Error { message } if message.contains("already"))));
    }

    #[test]
    fn test_no_files_found() {
        let empty = TempDir::new().unwrap();
        let db = Arc::new(HistoryDb::open_in_memory().unwrap());
        let (scanner, rx) = build(|_: &Path| Verdict::Clean, db.clone(), 1);

        assert_eq!(
            scanner.start_scan(&[empty.path()]),
            Err(ScanError::NoFilesFound)
        );
        assert_eq!(scanner.state(), ScanState::Failed);
        assert!(matches!(rx.try_recv(), Ok(ScanEvent::Error { .. })));
        assert_eq!(db.totals().unwrap().total_scans, 0);
        assert!(scanner.session_id().is_none());

        // A failed start leaves the scanner ready for another try
        let dir = make_files(2);
        scanner.start_scan(&[dir.path()]).unwrap();
        let (report, _) = wait_completed(&rx);
        assert_eq!(report.files_scanned, 2);
    }

    #[test]
    fn test_missing_root_is_no_files_found() {
        let dir = TempDir::new().unwrap();
        let (scanner, _rx) = build(
            |_: &Path| Verdict::Clean,
            Arc::new(HistoryDb::open_in_memory().unwrap()),
            1,
        );
        assert_eq!(
            scanner.start_scan(&[dir.path().join("gone")]),
            Err(ScanError::NoFilesFound)
        );
    }

    #[test]
    fn test_session_create_failure() {
        let dir = make_files(2);
        let (scanner, rx) = build(|_: &Path| Verdict::Clean, Arc::new(FailingStore), 1);

        match scanner.start_scan(&[dir.path()]) {
            Err(ScanError::SessionCreateFailed(msg)) => assert!(msg.contains("disk full")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(scanner.state(), ScanState::Failed);
        assert!(matches!(rx.try_recv(), Ok(ScanEvent::Error { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_threat_persisted_before_completion() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.exe"), b"x").unwrap();
        fs::write(dir.path().join("slow.txt"), b"y").unwrap();

        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let engine = move |path: &Path| {
            if file_name(path) == "bad.exe" {
                Verdict::Infected {
                    signature: "Eicar".into(),
                }
            } else {
                let _ = gate_rx.recv();
                Verdict::Clean
            }
        };
        let db = Arc::new(HistoryDb::open_in_memory().unwrap());
        let (scanner, rx) = build(engine, db.clone(), 2);
        let id = scanner.start_scan(&[dir.path()]).unwrap();

        loop {
            match rx.recv_timeout(WAIT).unwrap() {
                ScanEvent::FileScanned { infected: true, .. } => break,
                _ => continue,
            }
        }
        let details = db.scan_details(id).unwrap().unwrap();
        assert_eq!(details.threats.len(), 1);
        assert_eq!(details.threats[0].virus_name, "Eicar");
        assert_eq!(scanner.state(), ScanState::Scanning);

        drop(gate_tx);
        wait_completed(&rx);
    }

    #[test]
    fn test_duration_matches_wall_clock() {
        let dir = make_files(1);
        let engine = |_: &Path| {
            thread::sleep(Duration::from_millis(1200));
            Verdict::Clean
        };
        let (scanner, rx) = build(engine, Arc::new(HistoryDb::open_in_memory().unwrap()), 1);

        let started = Instant::now();
        scanner.start_scan(&[dir.path()]).unwrap();
        let (report, _) = wait_completed(&rx);
        let wall = round_secs(started.elapsed());

        assert!(report.duration_secs >= 1);
        assert!(report.duration_secs.abs_diff(wall) <= 1);
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_duration_includes_session_setup() {
        let dir = make_files(1);
        let store = FlakyStore {
            create_delay: Duration::from_millis(2500),
            ..FlakyStore::new()
        };
        let (scanner, rx) = build(|_: &Path| Verdict::Clean, Arc::new(store), 1);

        let before = Utc::now();
        let started = Instant::now();
        scanner.start_scan(&[dir.path()]).unwrap();
        let (report, _) = wait_completed(&rx);
        let wall = round_secs(started.elapsed());

        assert!(report.duration_secs >= 2, "duration {}", report.duration_secs);
        assert!(report.duration_secs.abs_diff(wall) <= 1);
        assert!(report.started_at - before < chrono::Duration::seconds(1));
    }

    #[test]
    fn test_threat_write_failure_does_not_abort_scan() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.exe"), vec![0u8; 8]).unwrap();
        fs::write(dir.path().join("ok.txt"), vec![0u8; 4]).unwrap();
        let engine = |path: &Path| {
            if file_name(path) == "bad.exe" {
                Verdict::Infected {
                    signature: "Eicar".into(),
                }
            } else {
                Verdict::Clean
            }
        };
        let store = Arc::new(FlakyStore {
            fail_threats: true,
            ..FlakyStore::new()
        });
        let (scanner, rx) = build(engine, store.clone(), 2);

        let id = scanner.start_scan(&[dir.path()]).unwrap();
        let (report, events) = wait_completed(&rx);

        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.threat_count(), 1);
        assert_eq!(report.threats()[0].signature, "Eicar");
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Error { .. })));

        let details = store.db.scan_details(id).unwrap().unwrap();
        assert_eq!(details.entry.threats_found, 1);
        assert!(details.threats.is_empty());
    }

    #[test]
    fn test_totals_write_failure_still_completes() {
        let dir = make_files(3);
        let store = FlakyStore {
            fail_finalize: true,
            ..FlakyStore::new()
        };
        let (scanner, rx) = build(|_: &Path| Verdict::Clean, Arc::new(store), 2);

        scanner.start_scan(&[dir.path()]).unwrap();
        let (report, events) = wait_completed(&rx);

        assert_eq!(report.files_scanned, 3);
        assert!(events.iter().any(|e| matches!(
            e,
            ScanEvent::Error { message } if message.contains("history write failed")
        )));
        wait_until(|| scanner.state() == ScanState::Completed);
    }

    #[test]
    fn test_progress_never_goes_backwards() {
        let dir = make_files(2000);
        let (scanner, rx) = build(
            |_: &Path| Verdict::Clean,
            Arc::new(HistoryDb::open_in_memory().unwrap()),
            64,
        );
        scanner.start_scan(&[dir.path()]).unwrap();
        let (_, events) = wait_completed(&rx);

        let counts: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Progress { scanned, .. } => Some(*scanned),
                _ => None,
            })
            .collect();
        assert!(counts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(counts.last(), Some(&2000));
    }

    #[test]
    fn test_failed_restart_clears_previous_session() {
        let dir = make_files(2);
        let empty = TempDir::new().unwrap();
        let (scanner, rx) = build(
            |_: &Path| Verdict::Clean,
            Arc::new(HistoryDb::open_in_memory().unwrap()),
            1,
        );

        let first = scanner.start_scan(&[dir.path()]).unwrap();
        wait_completed(&rx);
        wait_until(|| scanner.state() == ScanState::Completed);
        assert_eq!(scanner.session_id(), Some(first));

        assert_eq!(
            scanner.start_scan(&[empty.path()]),
            Err(ScanError::NoFilesFound)
        );
        assert_eq!(scanner.session_id(), None);
        assert_eq!(scanner.total_files(), 0);
    }

    #[test]
    fn test_restart_after_completion() {
        let dir = make_files(5);
        let (scanner, rx) = build(
            |_: &Path| Verdict::Clean,
            Arc::new(HistoryDb::open_in_memory().unwrap()),
            4,
        );

        let first = scanner.start_scan(&[dir.path()]).unwrap();
        wait_completed(&rx);
        wait_until(|| !scanner.is_scanning());

        let second = scanner.start_scan(&[dir.path()]).unwrap();
        assert_ne!(first, second);
        let (report, _) = wait_completed(&rx);
        assert_eq!(report.session_id, second);
        assert_eq!(report.files_scanned, 5);
    }

    #[test]
    fn test_restart_after_cancel() {
        let dir = make_files(30);
        let engine = |_: &Path| {
            thread::sleep(Duration::from_millis(5));
            Verdict::Clean
        };
        let (scanner, rx) = build(engine, Arc::new(HistoryDb::open_in_memory().unwrap()), 2);

        scanner.start_scan(&[dir.path()]).unwrap();
        scanner.stop_scan();
        let second = scanner.start_scan(&[dir.path()]).unwrap();
        let (report, _) = wait_completed(&rx);
        assert_eq!(report.session_id, second);
        assert_eq!(report.files_scanned, 30);
    }

    #[test]
    fn test_report_result_ignored_when_idle() {
        let (scanner, rx) = build(
            |_: &Path| Verdict::Clean,
            Arc::new(HistoryDb::open_in_memory().unwrap()),
            1,
        );
        scanner.report_result(Path::new("/x"), &Verdict::Clean, 10);
        assert_eq!(scanner.files_scanned(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_while_scanning_does_not_hang() {
        let dir = make_files(100);
        let engine = |_: &Path| {
            thread::sleep(Duration::from_millis(5));
            Verdict::Clean
        };
        let (scanner, _rx) = build(engine, Arc::new(HistoryDb::open_in_memory().unwrap()), 2);
        scanner.start_scan(&[dir.path()]).unwrap();
        drop(scanner);
    }

    #[test]
    fn test_state_terminal_classification() {
        assert!(ScanState::Idle.is_terminal());
        assert!(ScanState::Failed.is_terminal());
        assert!(!ScanState::Expanding.is_terminal());
        assert!(!ScanState::Finalizing.is_terminal());
        assert_eq!(ScanState::from_u8(ScanState::Cancelled as u8), ScanState::Cancelled);
    }
}
