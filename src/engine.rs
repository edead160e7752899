//! External scan invoker
//!
//! Runs the detection engine (`clamdscan` by default) as a subprocess, once per
//! file, with a hard timeout. The engine's text output is turned into a
//! [`Verdict`]; nothing here touches session state, so any number of workers
//! may call [`ScanEngine::scan_file`] at once.

use crate::config::EngineConfig;
use crate::error::ScanError;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default engine binary
pub const DEFAULT_PROGRAM: &str = "clamdscan";

/// Arguments placed before the file path
pub const DEFAULT_ARGS: &[&str] = &["--fdpass", "--no-summary"];

/// Per-file timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Token clamdscan appends to a detection line
pub const INFECTED_MARKER: &str = "FOUND";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READER_GRACE: Duration = Duration::from_millis(200);

/// Outcome of scanning one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Infected { signature: String },
    Error(ScanError),
}

impl Verdict {
    pub fn is_infected(&self) -> bool {
        matches!(self, Verdict::Infected { .. })
    }

    /// Signature name, or an empty string for anything but an infection
    pub fn signature(&self) -> &str {
        match self {
            Verdict::Infected { signature } => signature,
            _ => "",
        }
    }

    pub fn error(&self) -> Option<&ScanError> {
        match self {
            Verdict::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Anything that can judge a single file.
///
/// Implementations are called concurrently from pool workers and must not
/// block on scanner state.
pub trait ScanEngine: Send + Sync {
    fn scan_file(&self, path: &Path) -> Verdict;
}

impl<F> ScanEngine for F
where
    F: Fn(&Path) -> Verdict + Send + Sync,
{
    fn scan_file(&self, path: &Path) -> Verdict {
        self(path)
    }
}

/// `clamdscan` subprocess invoker
#[derive(Debug, Clone)]
pub struct ClamdScan {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    marker: String,
}

impl Default for ClamdScan {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            timeout: DEFAULT_TIMEOUT,
            marker: INFECTED_MARKER.to_string(),
        }
    }
}

impl ClamdScan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an invoker from the `[engine]` config section
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            marker: config.infected_marker.clone(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawn the engine and wait for it, killing it once the timeout elapses
    fn run(&self, path: &Path) -> Result<(ExitStatus, String, String), ScanError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ScanError::InvocationError(format!("failed to start {}: {}", self.program, e))
            })?;

        // Drain both pipes on their own threads so a chatty engine can't
        // block on a full pipe while we poll for exit.
        let stdout_reader = child.stdout.take().map(|pipe| thread::spawn(move || read_pipe(pipe)));
        let stderr_reader = child.stderr.take().map(|pipe| thread::spawn(move || read_pipe(pipe)));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        kill_and_reap(&mut child, [stdout_reader, stderr_reader]);
                        return Err(ScanError::InvocationTimeout(self.timeout));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    kill_and_reap(&mut child, [stdout_reader, stderr_reader]);
                    return Err(ScanError::InvocationError(format!(
                        "failed to wait for {}: {}",
                        self.program, e
                    )));
                }
            }
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        Ok((status, stdout, stderr))
    }
}

impl ScanEngine for ClamdScan {
    fn scan_file(&self, path: &Path) -> Verdict {
        match self.run(path) {
            Ok((status, stdout, stderr)) => {
                let verdict = interpret(status, &stdout, &stderr, &self.marker);
                tracing::debug!(path = %path.display(), ?verdict, "engine finished");
                verdict
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "engine invocation failed");
                Verdict::Error(e)
            }
        }
    }
}

/// Kill the engine, reap it, and join its pipe readers.
///
/// A process the engine forked can keep a pipe open after the kill; readers
/// still blocked once `READER_GRACE` has passed are left to finish on their
/// own.
fn kill_and_reap(child: &mut Child, readers: [Option<JoinHandle<String>>; 2]) {
    let _ = child.kill();
    let _ = child.wait();

    let deadline = Instant::now() + READER_GRACE;
    for reader in readers.into_iter().flatten() {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            tracing::debug!(pid = child.id(), "engine output pipe still held open after kill");
        }
    }
}

fn read_pipe<R: Read>(mut pipe: R) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Turn the engine's exit status and output into a verdict.
///
/// The marker wins over the exit status. Without a marker, exit codes 0 and 1
/// count as clean; anything else is an invocation error.
fn interpret(status: ExitStatus, stdout: &str, stderr: &str, marker: &str) -> Verdict {
    if let Some(signature) = parse_detection(stdout, marker) {
        return Verdict::Infected { signature };
    }

    match status.code() {
        Some(0) | Some(1) => Verdict::Clean,
        Some(code) => {
            let detail = first_line(stderr)
                .or_else(|| first_line(stdout))
                .unwrap_or("no output");
            Verdict::Error(ScanError::InvocationError(format!(
                "exited with status {}: {}",
                code, detail
            )))
        }
        None => Verdict::Error(ScanError::InvocationError(
            "terminated by a signal".to_string(),
        )),
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

/// Look for a detection line and pull the signature name out of it.
///
/// A detection line ends with the marker token: `path: Signature.Name FOUND`.
/// Returns `None` when no line carries the marker. When the marker is present
/// but the line has no `": "` separator the signature is an empty string.
pub fn parse_detection(output: &str, marker: &str) -> Option<String> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| line.split_whitespace().last() == Some(marker))?;

    let signature = line
        .rfind(": ")
        .map(|idx| &line[idx + 2..])
        .and_then(|rest| rest.strip_suffix(marker))
        .map(str::trim)
        .unwrap_or("");

    if signature.is_empty() {
        tracing::warn!(line, "detection line without a signature name");
    }

    Some(signature.to_string())
}
