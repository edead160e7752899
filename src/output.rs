//! Human and JSON rendering of scan reports and history

use crate::history::{HistoryEntry, HistoryTotals, ScanDetails};
use crate::report::{display_signature, ScanReport};
use crate::theme::Theme;
use crate::utils::{display_path, format_duration, format_size};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::time::Duration;

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Quiet,       // Only errors
    Normal,      // Standard output
    Verbose,     // Per-file errors
    VeryVerbose, // Every file
}

impl OutputMode {
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return OutputMode::Quiet;
        }
        match verbose {
            0 => OutputMode::Normal,
            1 => OutputMode::Verbose,
            _ => OutputMode::VeryVerbose,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    timestamp: String,
    #[serde(flatten)]
    report: &'a ScanReport,
    threats_found: usize,
    infected_bytes: u64,
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn print_report_human(report: &ScanReport, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    let title = if report.cancelled {
        "Scan Stopped"
    } else {
        "Scan Complete"
    };

    println!();
    println!("{}", Theme::header(title));
    println!("{}", Theme::divider_bold(60));
    println!(
        "{:<16} {}",
        Theme::primary("Files scanned"),
        Theme::value(&report.files_scanned.to_string())
    );
    println!(
        "{:<16} {}",
        Theme::primary("Data scanned"),
        Theme::size(&format_size(report.bytes_scanned))
    );
    println!(
        "{:<16} {}",
        Theme::primary("Duration"),
        Theme::value(&format_duration(Duration::from_secs(report.duration_secs)))
    );
    println!(
        "{:<16} {}",
        Theme::primary("Started"),
        Theme::muted(&local_time(report.started_at))
    );
    println!("{}", Theme::divider(60));

    if !report.has_threats() {
        println!("{}", Theme::success("No threats found."));
        println!();
        return;
    }

    println!(
        "{} {}",
        Theme::error(&report.threat_count().to_string()),
        Theme::error(if report.threat_count() == 1 {
            "threat found:"
        } else {
            "threats found:"
        })
    );
    for threat in report.threats() {
        println!(
            "  {}  {} {}",
            Theme::threat(display_signature(&threat.signature)),
            display_path(&threat.path),
            Theme::muted(&format!("({})", format_size(threat.size_bytes)))
        );
    }
    println!();
    println!(
        "Run {} to review this scan later.",
        Theme::command(&format!("fastav history --show {}", report.session_id))
    );
    println!();
}

pub fn print_report_json(report: &ScanReport) -> anyhow::Result<()> {
    let json = JsonReport {
        version: "1.0",
        timestamp: Utc::now().to_rfc3339(),
        report,
        threats_found: report.threat_count(),
        infected_bytes: report.infected_bytes(),
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

pub fn print_history_human(entries: &[HistoryEntry], mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    println!();
    println!("{}", Theme::header("Scan History"));
    println!("{}", Theme::divider_bold(78));

    if entries.is_empty() {
        println!("{}", Theme::muted("No scans recorded yet."));
        println!();
        return;
    }

    println!(
        "{:>5}  {:<19}  {:>8}  {:>10}  {:>7}  {:>8}",
        Theme::primary("ID"),
        Theme::primary("Date"),
        Theme::primary("Files"),
        Theme::primary("Size"),
        Theme::primary("Threats"),
        Theme::primary("Duration")
    );
    println!("{}", Theme::divider(78));

    for entry in entries {
        let threats = entry.threats_found.to_string();
        println!(
            "{:>5}  {:<19}  {:>8}  {:>10}  {:>7}  {:>8}",
            Theme::value(&entry.id.to_string()),
            local_time(entry.scan_date),
            entry.files_scanned,
            Theme::size(&format_size(entry.bytes_scanned)),
            if entry.threats_found > 0 {
                Theme::error(&threats)
            } else {
                Theme::success(&threats)
            },
            format_duration(Duration::from_secs(entry.duration_secs))
        );
        if mode != OutputMode::Normal {
            println!("       {}", Theme::muted(&entry.scan_path));
        }
    }
    println!();
}

pub fn print_details_human(details: &ScanDetails) {
    let entry = &details.entry;
    println!();
    println!("{}", Theme::header(&format!("Scan #{}", entry.id)));
    println!("{}", Theme::divider_bold(60));
    println!("{:<16} {}", Theme::primary("Date"), local_time(entry.scan_date));
    println!("{:<16} {}", Theme::primary("Paths"), entry.scan_path);
    println!(
        "{:<16} {}",
        Theme::primary("Files scanned"),
        Theme::value(&entry.files_scanned.to_string())
    );
    println!(
        "{:<16} {}",
        Theme::primary("Data scanned"),
        Theme::size(&format_size(entry.bytes_scanned))
    );
    println!(
        "{:<16} {}",
        Theme::primary("Duration"),
        format_duration(Duration::from_secs(entry.duration_secs))
    );
    println!("{}", Theme::divider(60));

    if details.threats.is_empty() {
        println!("{}", Theme::success("No threats were found in this scan."));
    } else {
        for threat in &details.threats {
            println!(
                "  {}  {} {}",
                Theme::threat(display_signature(&threat.virus_name)),
                display_path(&threat.file_path),
                Theme::muted(&format!(
                    "({}, {})",
                    format_size(threat.file_size),
                    local_time(threat.detection_time)
                ))
            );
        }
    }
    println!();
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_stats(
    totals: &HistoryTotals,
    last_scan: Option<&HistoryEntry>,
    last_update: Option<DateTime<Local>>,
) {
    println!();
    println!("{}", Theme::header("Protection Statistics"));
    println!("{}", Theme::divider_bold(60));
    println!(
        "{:<22} {}",
        Theme::primary("Scans run"),
        Theme::value(&totals.total_scans.to_string())
    );
    println!(
        "{:<22} {}",
        Theme::primary("Files scanned"),
        Theme::value(&totals.total_files.to_string())
    );
    println!(
        "{:<22} {}",
        Theme::primary("Data scanned"),
        Theme::size(&format_size(totals.total_bytes))
    );
    let threats = totals.total_threats.to_string();
    println!(
        "{:<22} {}",
        Theme::primary("Threats detected"),
        if totals.total_threats > 0 {
            Theme::error(&threats)
        } else {
            Theme::success(&threats)
        }
    );
    println!(
        "{:<22} {}",
        Theme::primary("Last scan"),
        last_scan
            .map(|e| local_time(e.scan_date))
            .unwrap_or_else(|| "never".to_string())
    );
    match last_update {
        Some(time) => println!(
            "{:<22} {}",
            Theme::primary("Signatures updated"),
            time.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!(
            "{:<22} {} (run {})",
            Theme::primary("Signatures updated"),
            Theme::warning("unknown"),
            Theme::command("fastav update")
        ),
    }
    println!();
}
