//! User configuration
//!
//! Stored as TOML in the platform config directory:
//!   ~/.config/fastav/config.toml (Linux)
//!   %APPDATA%\fastav\config\config.toml (Windows)
//!
//! A missing or unreadable file never stops a scan; defaults are used instead.

use crate::engine::{DEFAULT_ARGS, DEFAULT_PROGRAM, DEFAULT_TIMEOUT, INFECTED_MARKER};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub scan: ScanConfig,
    pub database: DatabaseConfig,
    pub update: UpdateConfig,
}

/// How the external detection engine is invoked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub infected_marker: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            infected_marker: INFECTED_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Worker threads; 0 means one per available core
    pub workers: usize,
    /// Glob patterns for files and directories to skip
    pub exclusions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Override for the history database location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdateConfig {
    pub program: String,
    pub log_path: PathBuf,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            program: "freshclam".to_string(),
            log_path: PathBuf::from("/var/log/clamav/freshclam.log"),
        }
    }
}

impl Config {
    /// Load config from disk, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("ignoring config file {}: {:#}", path.display(), e);
                }
                Self::default()
            }
        }
    }

    /// Load config, writing the defaults out if no file exists yet
    pub fn load_or_create() -> Self {
        let config = Self::load();
        if let Some(path) = config_path() {
            if !path.exists() {
                if let Err(e) = config.save() {
                    tracing::warn!("could not write default config: {:#}", e);
                }
            }
        }
        config
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path().context("No config directory available on this platform")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Overwrite the config file with defaults
    pub fn reset() -> Result<Self> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }

    /// Apply command-line flags on top of file values
    pub fn apply_cli_overrides(
        &mut self,
        workers: Option<usize>,
        timeout_secs: Option<u64>,
        exclusions: &[String],
    ) {
        if let Some(workers) = workers {
            self.scan.workers = workers;
        }
        if let Some(timeout) = timeout_secs {
            self.engine.timeout_secs = timeout;
        }
        self.scan.exclusions.extend(exclusions.iter().cloned());
    }

    /// Compile the exclusion patterns
    pub fn exclusion_set(&self) -> Result<GlobSet> {
        build_glob_set(&self.scan.exclusions)
    }

    /// History database location (config override or platform data dir)
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.database.path {
            return Ok(path.clone());
        }
        let dirs = project_dirs().context("No data directory available on this platform")?;
        Ok(dirs.data_dir().join("fastav.db"))
    }
}

pub fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid exclusion pattern: {}", pattern))?;
        builder.add(glob);
    }
    builder.build().context("Failed to compile exclusion patterns")
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "fastav")
}

/// Location of the config file, if the platform has a config dir
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

/// Directory for small state files (last update time, etc.)
pub fn state_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_engine() {
        let config = Config::default();
        assert_eq!(config.engine.program, "clamdscan");
        assert_eq!(config.engine.args, vec!["--fdpass", "--no-summary"]);
        assert_eq!(config.engine.timeout_secs, 60);
        assert_eq!(config.scan.workers, 0);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.scan.workers = 3;
        config.scan.exclusions.push("**/*.iso".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine]\ntimeout_secs = 5\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.timeout_secs, 5);
        assert_eq!(loaded.engine.program, "clamdscan");
        assert_eq!(loaded.update.program, "freshclam");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "engine = [[[").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.apply_cli_overrides(Some(8), Some(10), &["*.tmp".to_string()]);
        assert_eq!(config.scan.workers, 8);
        assert_eq!(config.engine.timeout_secs, 10);
        assert_eq!(config.scan.exclusions, vec!["*.tmp"]);

        config.apply_cli_overrides(None, None, &[]);
        assert_eq!(config.scan.workers, 8);
    }

    #[test]
    fn test_exclusion_set() {
        let mut config = Config::default();
        config.scan.exclusions = vec!["**/*.iso".into(), "**/node_modules".into()];
        let set = config.exclusion_set().unwrap();
        assert!(set.is_match(Path::new("/home/u/big.iso")));
        assert!(set.is_match(Path::new("/home/u/app/node_modules")));
        assert!(!set.is_match(Path::new("/home/u/notes.txt")));
    }

    #[test]
    fn test_invalid_exclusion_pattern() {
        assert!(build_glob_set(&["a[".to_string()]).is_err());
    }

    #[test]
    fn test_database_path_override() {
        let mut config = Config::default();
        config.database.path = Some(PathBuf::from("/tmp/custom.db"));
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/custom.db"));
    }
}
