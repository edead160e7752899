//! Scan command feature.
//!
//! This module owns and handles the "fastav scan" command behavior.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::engine::ClamdScan;
use crate::history::HistoryDb;
use crate::output::{self, OutputMode};
use crate::progress;
use crate::report::{display_signature, ScanReport};
use crate::scan_events::ScanEvent;
use crate::scanner::Scanner;
use crate::theme::Theme;
use crate::utils::{self, display_path};

const EVENT_POLL: Duration = Duration::from_millis(100);

pub(crate) struct ScanArgs {
    pub json: bool,
    pub workers: Option<usize>,
    pub timeout: Option<u64>,
    pub exclude: Vec<String>,
}

pub(crate) fn handle_scan(paths: Vec<PathBuf>, args: ScanArgs, mode: OutputMode) -> Result<ExitCode> {
    let mut config = Config::load();
    config.apply_cli_overrides(args.workers, args.timeout, &args.exclude);
    let exclusions = config.exclusion_set()?;

    let roots = if paths.is_empty() {
        utils::common_scan_locations()
    } else {
        paths
    };

    let db = Arc::new(HistoryDb::open_default(&config)?);
    let engine = Arc::new(ClamdScan::from_config(&config.engine));
    tracing::debug!(
        program = %config.engine.program,
        timeout_secs = engine.timeout().as_secs(),
        "engine configured"
    );
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let scanner = Scanner::builder(engine, db)
        .with_workers(config.scan.workers)
        .with_exclusions(exclusions)
        .with_event_sink(Arc::new(event_tx))
        .build()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let interactive = mode != OutputMode::Quiet && !args.json;
    let spinner = if interactive {
        progress::create_spinner("Collecting files...")
    } else {
        ProgressBar::hidden()
    };

    let started = scanner.start_scan(&roots);
    spinner.finish_and_clear();
    let session_id = started?;

    if interactive {
        println!(
            "Scanning {} files with {} workers (scan #{})",
            Theme::value(&scanner.total_files().to_string()),
            scanner.num_workers(),
            session_id
        );
    }
    let bar = if interactive {
        progress::create_scan_bar(scanner.total_files())
    } else {
        ProgressBar::hidden()
    };

    let report = wait_for_report(&scanner, &event_rx, &bar, &running, mode)?;
    bar.finish_and_clear();

    if args.json {
        output::print_report_json(&report)?;
    } else {
        output::print_report_human(&report, mode);
    }

    Ok(if report.has_threats() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

/// Drive the progress bar from scan events until a report is available
fn wait_for_report(
    scanner: &Scanner,
    events: &crossbeam_channel::Receiver<ScanEvent>,
    bar: &ProgressBar,
    running: &AtomicBool,
    mode: OutputMode,
) -> Result<ScanReport> {
    loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(ScanEvent::Completed(report)) => return Ok(report),
            Ok(ScanEvent::Progress { scanned, total }) => {
                bar.set_length(total);
                bar.set_position(scanned);
            }
            Ok(ScanEvent::FileScanned {
                path,
                infected,
                signature,
                error,
            }) => {
                let shown = display_path(&path);
                if infected {
                    bar.println(format!(
                        "{} {}  {}",
                        Theme::error("FOUND"),
                        Theme::threat(display_signature(&signature)),
                        shown
                    ));
                } else if let Some(err) = error {
                    if mode != OutputMode::Normal {
                        bar.println(format!("{} {}: {}", Theme::warning("SKIP"), shown, err));
                    }
                } else if mode == OutputMode::VeryVerbose {
                    bar.println(format!("{} {}", Theme::success("OK"), Theme::muted(&shown)));
                }
                bar.set_message(progress::truncate_path(&shown, 40));
            }
            Ok(ScanEvent::Error { message }) => {
                bar.suspend(|| eprintln!("{} {}", Theme::error("Error:"), message));
            }
            Ok(ScanEvent::Started { .. }) => {}
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::SeqCst) {
                    bar.set_message("Stopping...");
                    // None means the scan finished first; its report is on the way
                    if let Some(report) = scanner.stop_scan() {
                        return Ok(report);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("Scan ended without a report"));
            }
        }
    }
}
