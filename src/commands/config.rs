use crate::core::config::MonitorConfig;
use anyhow::{Context, Result};
use colored::Colorize;

/// Print the effective configuration and where it is read from
pub fn execute() -> Result<()> {
    let path = MonitorConfig::config_path()?;
    let config = MonitorConfig::load().context("Failed to load configuration")?;

    let source = if path.exists() {
        path.display().to_string().cyan()
    } else {
        format!("{} (not found, using defaults)", path.display()).dimmed()
    };

    println!("{} {}", "Config file:".bold(), source);
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}
