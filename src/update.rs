//! Virus signature updates via `freshclam`
//!
//! `freshclam` usually needs root, so the update is attempted through
//! `pkexec` first, then `sudo`, then directly (which works when the user is
//! in the clamav group). The first launcher that starts is used; its output
//! is streamed line by line to the caller.

use crate::config::{self, UpdateConfig};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const LOG_START_MARKER: &str = "ClamAV update process started at ";
const LOG_DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";
const STATE_FILE: &str = "update_state.json";

/// How `freshclam` gets launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    Pkexec,
    Sudo,
    Direct,
}

impl Launcher {
    /// Launchers present on this system, in the order they are tried
    pub fn available() -> Vec<Launcher> {
        let mut launchers = Vec::new();
        #[cfg(unix)]
        {
            if Path::new("/usr/bin/pkexec").exists() {
                launchers.push(Launcher::Pkexec);
            }
            if Path::new("/usr/bin/sudo").exists() {
                launchers.push(Launcher::Sudo);
            }
        }
        launchers.push(Launcher::Direct);
        launchers
    }

    fn command(self, program: &str) -> Command {
        let mut cmd = match self {
            Launcher::Pkexec => {
                let mut c = Command::new("pkexec");
                c.arg(program);
                c
            }
            Launcher::Sudo => {
                let mut c = Command::new("sudo");
                c.arg(program);
                c
            }
            Launcher::Direct => Command::new(program),
        };
        cmd.arg("--verbose");
        cmd
    }
}

impl fmt::Display for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Launcher::Pkexec => f.write_str("pkexec"),
            Launcher::Sudo => f.write_str("sudo"),
            Launcher::Direct => f.write_str("direct execution"),
        }
    }
}

/// A finished, successful update
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub launcher: Launcher,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UpdateState {
    last_update: DateTime<Utc>,
}

/// Clears the in-progress flag when an update ends, however it ends
struct UpdatingGuard<'a>(&'a AtomicBool);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Updater {
    program: String,
    log_path: PathBuf,
    state_file: Option<PathBuf>,
    launchers: Vec<Launcher>,
    updating: AtomicBool,
}

impl Updater {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            program: config.program.clone(),
            log_path: config.log_path.clone(),
            state_file: config::state_dir().map(|d| d.join(STATE_FILE)),
            launchers: Launcher::available(),
            updating: AtomicBool::new(false),
        }
    }

    pub fn with_launchers(mut self, launchers: Vec<Launcher>) -> Self {
        self.launchers = launchers;
        self
    }

    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Run `freshclam`, passing each line of its output to `on_line`.
    ///
    /// Fails if an update is already running, if no launcher could start the
    /// program, or if it exits unsuccessfully.
    pub fn update<F>(&self, mut on_line: F) -> Result<UpdateOutcome>
    where
        F: FnMut(&str),
    {
        if self
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            bail!("Update already in progress");
        }
        let _guard = UpdatingGuard(&self.updating);

        let mut last_error = None;
        let mut started = None;
        for &launcher in &self.launchers {
            on_line(&format!("Trying to update with {}...", launcher));
            let spawned = launcher
                .command(&self.program)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn();
            match spawned {
                Ok(child) => {
                    started = Some((launcher, child));
                    break;
                }
                Err(e) => {
                    tracing::debug!("{} could not start {}: {}", launcher, self.program, e);
                    last_error = Some(e);
                }
            }
        }

        let Some((launcher, mut child)) = started else {
            bail!(
                "Cannot start {program}. Try running it manually:\n  sudo {program}\n\
                 Or add your user to the clamav group:\n  sudo usermod -a -G clamav $USER\n\
                 Last error: {err}",
                program = self.program,
                err = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no launcher available".to_string())
            );
        };
        tracing::info!("signature update started with {}", launcher);

        let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
        let readers: Vec<_> = [
            child.stdout.take().map(|p| Box::new(p) as Box<dyn Read + Send>),
            child.stderr.take().map(|p| Box::new(p) as Box<dyn Read + Send>),
        ]
        .into_iter()
        .flatten()
        .map(|pipe| {
            let tx = line_tx.clone();
            thread::spawn(move || {
                for line in BufReader::new(pipe).lines().map_while(|l| l.ok()) {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
        drop(line_tx);

        // Ends once both pipes are closed
        for line in line_rx {
            let line = line.trim();
            if !line.is_empty() {
                on_line(line);
            }
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for {}", self.program))?;
        if !status.success() {
            match status.code() {
                Some(code) => bail!("Update failed with exit code: {}", code),
                None => bail!("Update was terminated by a signal"),
            }
        }

        let finished_at = Utc::now();
        if let Err(e) = self.save_state(finished_at) {
            tracing::warn!("could not record update time: {:#}", e);
        }
        tracing::info!("signature update finished");
        Ok(UpdateOutcome {
            launcher,
            finished_at,
        })
    }

    /// When signatures were last updated: the newest start line in the
    /// freshclam log, or the time this tool last ran a successful update.
    pub fn last_update_time(&self) -> Option<DateTime<Local>> {
        match fs::read_to_string(&self.log_path) {
            Ok(log) => {
                if let Some(time) = parse_freshclam_log(&log) {
                    return Some(time);
                }
            }
            Err(e) => tracing::debug!("cannot read {}: {}", self.log_path.display(), e),
        }
        self.load_state().map(|t| t.with_timezone(&Local))
    }

    fn save_state(&self, at: DateTime<Utc>) -> Result<()> {
        let Some(ref path) = self.state_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&UpdateState { last_update: at })?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn load_state(&self) -> Option<DateTime<Utc>> {
        let path = self.state_file.as_ref()?;
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str::<UpdateState>(&content)
            .map(|s| s.last_update)
            .ok()
    }
}

/// Newest "update process started" time in a freshclam log (local time)
pub fn parse_freshclam_log(log: &str) -> Option<DateTime<Local>> {
    log.lines()
        .filter_map(|line| {
            let idx = line.find(LOG_START_MARKER)?;
            let date = line[idx + LOG_START_MARKER.len()..].trim();
            let naive = NaiveDateTime::parse_from_str(date, LOG_DATE_FORMAT).ok()?;
            Local.from_local_datetime(&naive).earliest()
        })
        .last()
}
