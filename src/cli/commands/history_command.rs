//! History command feature.
//!
//! This module owns and handles the "fastav history" command behavior.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::history::HistoryDb;
use crate::output::{self, OutputMode};
use crate::theme::Theme;

pub(crate) fn handle_history(
    limit: usize,
    show: Option<i64>,
    delete: Option<i64>,
    json: bool,
    mode: OutputMode,
) -> Result<()> {
    let config = Config::load();
    let db = HistoryDb::open_default(&config)?;

    if let Some(id) = delete {
        if !db.delete_scan(id)? {
            bail!("No scan with id {}", id);
        }
        if mode != OutputMode::Quiet {
            println!("{} Scan #{} removed from history.", Theme::success("OK"), id);
        }
        return Ok(());
    }

    if let Some(id) = show {
        let details = db
            .scan_details(id)?
            .with_context(|| format!("No scan with id {}", id))?;
        if json {
            output::print_json(&details)?;
        } else {
            output::print_details_human(&details);
        }
        return Ok(());
    }

    let entries = db.history(limit)?;
    if json {
        output::print_json(&entries)
    } else {
        output::print_history_human(&entries, mode);
        Ok(())
    }
}
