//! SQLite storage for scan history

use super::{HistoryEntry, HistoryTotals, ScanDetails, ScanStore, ScanTotals, StoredThreat};
use crate::config::Config;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i32 = 1;

/// Scan history database.
///
/// One connection behind a mutex: every statement runs with the lock held,
/// so concurrent workers never interleave writes.
pub struct HistoryDb {
    db: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl HistoryDb {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let db = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        db.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        db.busy_timeout(Duration::from_secs(30))
            .context("Failed to set busy timeout")?;

        Self::with_connection(db, Some(path.to_path_buf()))
    }

    /// Open the database named by the config (or the platform default)
    pub fn open_default(config: &Config) -> Result<Self> {
        let path = config.database_path()?;
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(db, None)
    }

    fn with_connection(mut db: Connection, path: Option<PathBuf>) -> Result<Self> {
        db.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;
        init_schema(&mut db)?;
        Ok(Self {
            db: Mutex::new(db),
            path,
        })
    }

    /// File backing this database; `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Most recent scans that looked at at least one file, newest first
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, scan_date, scan_path, files_scanned, bytes_scanned, threats_found, scan_duration
             FROM scan_history
             WHERE files_scanned > 0
             ORDER BY scan_date DESC, id DESC
             LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], entry_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn last_scan(&self) -> Result<Option<HistoryEntry>> {
        Ok(self.history(1)?.into_iter().next())
    }

    /// A scan record and every threat it found
    pub fn scan_details(&self, scan_id: i64) -> Result<Option<ScanDetails>> {
        let db = self.db.lock();
        let entry = db
            .query_row(
                "SELECT id, scan_date, scan_path, files_scanned, bytes_scanned, threats_found, scan_duration
                 FROM scan_history WHERE id = ?1",
                [scan_id],
                entry_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load scan {}", scan_id))?;

        let Some(entry) = entry else {
            return Ok(None);
        };

        let mut stmt = db.prepare(
            "SELECT id, file_path, virus_name, file_size, detection_time
             FROM threats WHERE scan_id = ?1 ORDER BY detection_time, id",
        )?;
        let threats = stmt
            .query_map([scan_id], |row| {
                Ok(StoredThreat {
                    id: row.get(0)?,
                    file_path: PathBuf::from(row.get::<_, String>(1)?),
                    virus_name: row.get(2)?,
                    file_size: to_u64(row.get(3)?),
                    detection_time: from_timestamp(row.get(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(ScanDetails { entry, threats }))
    }

    /// Delete a scan and its threats. Returns false if no such scan exists.
    pub fn delete_scan(&self, scan_id: i64) -> Result<bool> {
        let db = self.db.lock();
        let removed = db
            .execute("DELETE FROM scan_history WHERE id = ?1", [scan_id])
            .with_context(|| format!("Failed to delete scan {}", scan_id))?;
        Ok(removed > 0)
    }

    pub fn totals(&self) -> Result<HistoryTotals> {
        let db = self.db.lock();
        db.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(files_scanned), 0),
                    COALESCE(SUM(bytes_scanned), 0),
                    COALESCE(SUM(threats_found), 0)
             FROM scan_history WHERE files_scanned > 0",
            [],
            |row| {
                Ok(HistoryTotals {
                    total_scans: to_u64(row.get(0)?),
                    total_files: to_u64(row.get(1)?),
                    total_bytes: to_u64(row.get(2)?),
                    total_threats: to_u64(row.get(3)?),
                })
            },
        )
        .context("Failed to compute history totals")
    }
}

impl ScanStore for HistoryDb {
    fn create_scan_record(&self, scan_path: &str) -> Result<i64> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO scan_history (scan_date, scan_path) VALUES (?1, ?2)",
            params![Utc::now().timestamp(), scan_path],
        )
        .context("Failed to insert scan record")?;
        Ok(db.last_insert_rowid())
    }

    fn record_threat(&self, scan_id: i64, path: &Path, signature: &str, size_bytes: u64) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO threats (scan_id, file_path, virus_name, file_size, detection_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                scan_id,
                path.to_string_lossy().to_string(),
                signature,
                to_i64(size_bytes),
                Utc::now().timestamp()
            ],
        )
        .with_context(|| format!("Failed to record threat in {}", path.display()))?;
        Ok(())
    }

    fn finalize_scan_record(&self, scan_id: i64, totals: &ScanTotals) -> Result<()> {
        let db = self.db.lock();
        let updated = db
            .execute(
                "UPDATE scan_history
                 SET files_scanned = ?1, bytes_scanned = ?2, threats_found = ?3, scan_duration = ?4
                 WHERE id = ?5",
                params![
                    to_i64(totals.files_scanned),
                    to_i64(totals.bytes_scanned),
                    to_i64(totals.threats_found),
                    to_i64(totals.duration_secs),
                    scan_id
                ],
            )
            .with_context(|| format!("Failed to finalize scan {}", scan_id))?;

        if updated == 0 {
            anyhow::bail!("Scan record {} does not exist", scan_id);
        }
        Ok(())
    }
}

fn init_schema(db: &mut Connection) -> Result<()> {
    let version: i32 = db
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .or_else(|_| {
            db.execute(
                "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
                [],
            )?;
            db.execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
            Ok::<i32, rusqlite::Error>(0)
        })
        .context("Failed to read schema version")?;

    if version < SCHEMA_VERSION {
        migrate_schema(db, version)?;
    }
    Ok(())
}

fn migrate_schema(db: &mut Connection, from_version: i32) -> Result<()> {
    let tx = db
        .transaction()
        .context("Failed to start migration transaction")?;

    if from_version == 0 {
        tx.execute(
            "CREATE TABLE IF NOT EXISTS scan_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_date INTEGER NOT NULL,
                scan_path TEXT NOT NULL,
                files_scanned INTEGER NOT NULL DEFAULT 0,
                bytes_scanned INTEGER NOT NULL DEFAULT 0,
                threats_found INTEGER NOT NULL DEFAULT 0,
                scan_duration INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .context("Failed to create scan_history table")?;

        tx.execute(
            "CREATE TABLE IF NOT EXISTS threats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id INTEGER NOT NULL REFERENCES scan_history(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                virus_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                detection_time INTEGER NOT NULL
            )",
            [],
        )
        .context("Failed to create threats table")?;

        tx.execute(
            "CREATE INDEX IF NOT EXISTS idx_threats_scan_id ON threats(scan_id)",
            [],
        )
        .context("Failed to create threats index")?;
        tx.execute(
            "CREATE INDEX IF NOT EXISTS idx_scan_date ON scan_history(scan_date)",
            [],
        )
        .context("Failed to create scan_date index")?;

        tx.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])
            .context("Failed to update schema version")?;
    }

    tx.commit()
        .context("Failed to commit migration transaction")?;
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        scan_date: from_timestamp(row.get(1)?),
        scan_path: row.get(2)?,
        files_scanned: to_u64(row.get(3)?),
        bytes_scanned: to_u64(row.get(4)?),
        threats_found: to_u64(row.get(5)?),
        duration_secs: to_u64(row.get(6)?),
    })
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

// SQLite integers are signed 64-bit; sizes beyond that are capped
fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
