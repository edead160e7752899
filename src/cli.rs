use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::logging;
use crate::output::OutputMode;

mod commands {
    pub(crate) mod config_command;
    pub(crate) mod history_command;
    pub(crate) mod scan_command;
    pub(crate) mod stats_command;
    pub(crate) mod update_command;
}

#[derive(Parser)]
#[command(name = "fastav")]
#[command(version)]
#[command(about = "Fast parallel virus scanning on top of ClamAV")]
#[command(long_about = "fastav scans files in parallel with clamdscan, keeps a history of every \
    scan and updates virus signatures with freshclam.\n\n\
    Examples:\n  \
    fastav scan                      # Scan home, Documents, Downloads and Desktop\n  \
    fastav scan ~/Downloads -w 8     # Scan one folder with 8 workers\n  \
    fastav history --show 12         # Threats found by scan 12\n  \
    fastav update                    # Update virus signatures")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan files and folders for viruses
    #[command(visible_alias = "s")]
    Scan {
        /// Files or folders to scan (default: common user folders)
        #[arg(value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Output the report as JSON for scripting
        #[arg(long)]
        json: bool,

        /// Worker threads (0 = one per CPU core)
        #[arg(short = 'w', long, value_name = "N")]
        workers: Option<usize>,

        /// Per-file engine timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Skip paths matching a glob pattern (repeatable)
        #[arg(long, value_name = "PATTERN")]
        exclude: Vec<String>,
    },

    /// Show past scans
    #[command(visible_alias = "h")]
    History {
        /// Number of scans to list
        #[arg(short = 'n', long, default_value = "20", value_name = "N")]
        limit: usize,

        /// Show one scan and its threats
        #[arg(long, value_name = "ID", conflicts_with = "delete")]
        show: Option<i64>,

        /// Delete a scan from the history
        #[arg(long, value_name = "ID")]
        delete: Option<i64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Totals across every recorded scan
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Update virus signatures with freshclam
    Update {
        /// Only show when signatures were last updated
        #[arg(long)]
        check: bool,
    },

    /// View or reset configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long, conflicts_with = "show")]
        reset: bool,

        /// Print the config file location
        #[arg(long)]
        path: bool,
    },
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_flags(self.quiet, self.verbose)
    }

    pub fn run(self) -> anyhow::Result<ExitCode> {
        logging::init_tracing(self.verbose);
        let mode = self.output_mode();

        match self.command {
            Commands::Scan {
                paths,
                json,
                workers,
                timeout,
                exclude,
            } => commands::scan_command::handle_scan(
                paths,
                commands::scan_command::ScanArgs {
                    json,
                    workers,
                    timeout,
                    exclude,
                },
                mode,
            ),
            Commands::History {
                limit,
                show,
                delete,
                json,
            } => {
                commands::history_command::handle_history(limit, show, delete, json, mode)?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Stats { json } => {
                commands::stats_command::handle_stats(json)?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Update { check } => {
                commands::update_command::handle_update(check, mode)?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Config { show, reset, path } => {
                commands::config_command::handle_config(show, reset, path)?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
