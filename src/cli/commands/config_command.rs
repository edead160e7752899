//! Config command feature.

use anyhow::Result;

use crate::config::{self, Config};
use crate::theme::Theme;

pub(crate) fn handle_config(show: bool, reset: bool, path: bool) -> Result<()> {
    if reset {
        Config::reset()?;
        println!("{} Configuration reset to defaults.", Theme::success("OK"));
        return Ok(());
    }

    if path && !show {
        match config::config_path() {
            Some(p) => println!("{}", p.display()),
            None => anyhow::bail!("No config directory available on this platform"),
        }
        return Ok(());
    }

    let config = Config::load_or_create();
    print_config(&config);
    Ok(())
}

fn print_config(config: &Config) {
    println!("{}", Theme::header("Current Configuration"));
    println!("{}", Theme::divider_bold(60));
    println!();
    println!("Engine:");
    println!("  Program: {}", config.engine.program);
    println!("  Arguments: {}", config.engine.args.join(" "));
    println!("  Timeout: {} s per file", config.engine.timeout_secs);
    println!("  Infected marker: {}", config.engine.infected_marker);
    println!();
    println!("Scan:");
    println!("  Workers: {} (0 = auto)", config.scan.workers);
    if config.scan.exclusions.is_empty() {
        println!("  Exclusions: (none)");
    } else {
        println!("  Exclusions:");
        for pattern in &config.scan.exclusions {
            println!("    {}", pattern);
        }
    }
    println!();
    println!("Database:");
    match config.database_path() {
        Ok(p) => println!("  Path: {}", p.display()),
        Err(_) => println!("  Path: (unavailable)"),
    }
    println!();
    println!("Update:");
    println!("  Program: {}", config.update.program);
    println!("  Log: {}", config.update.log_path.display());
    println!();
    if let Some(p) = config::config_path() {
        println!("Config file: {}", Theme::muted(&p.display().to_string()));
    }
}
