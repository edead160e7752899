//! Stats command feature.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::history::{HistoryDb, HistoryEntry, HistoryTotals};
use crate::output;
use crate::update::Updater;

#[derive(Serialize)]
struct JsonStats {
    #[serde(flatten)]
    totals: HistoryTotals,
    last_scan: Option<HistoryEntry>,
    last_signature_update: Option<String>,
}

pub(crate) fn handle_stats(json: bool) -> Result<()> {
    let config = Config::load();
    let db = HistoryDb::open_default(&config)?;
    let totals = db.totals()?;
    let last_scan = db.last_scan()?;
    let last_update = Updater::from_config(&config.update).last_update_time();

    if json {
        output::print_json(&JsonStats {
            totals,
            last_scan,
            last_signature_update: last_update.map(|t| t.to_rfc3339()),
        })
    } else {
        output::print_stats(&totals, last_scan.as_ref(), last_update);
        Ok(())
    }
}
