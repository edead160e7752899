//! Update command feature.
//!
//! This module owns and handles the "fastav update" command behavior.

use anyhow::Result;

use crate::config::Config;
use crate::output::OutputMode;
use crate::theme::Theme;
use crate::update::Updater;

pub(crate) fn handle_update(check: bool, mode: OutputMode) -> Result<()> {
    let config = Config::load();
    let updater = Updater::from_config(&config.update);

    if check {
        match updater.last_update_time() {
            Some(time) => println!(
                "Signatures last updated: {}",
                Theme::value(&time.format("%Y-%m-%d %H:%M:%S").to_string())
            ),
            None => println!(
                "Signatures last updated: {} (run {})",
                Theme::warning("unknown"),
                Theme::command("fastav update")
            ),
        }
        return Ok(());
    }

    if mode != OutputMode::Quiet {
        println!("{}", Theme::header("Updating virus signatures"));
    }
    let outcome = updater.update(|line| {
        if mode != OutputMode::Quiet {
            println!("  {}", Theme::muted(line));
        }
    })?;

    if mode != OutputMode::Quiet {
        println!(
            "{} Signatures updated ({}).",
            Theme::success("OK"),
            outcome.launcher
        );
    }
    Ok(())
}
