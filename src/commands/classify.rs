use crate::core::monitor::{classify, ClassifierScope, ProcessIdentity};
use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;

/// Run the process classifier against a name given on the command line
pub fn execute(matches: &ArgMatches) -> Result<()> {
    let name = matches
        .get_one::<String>("name")
        .context("Process name is required")?;

    let mut identity = ProcessIdentity::new(name);
    if let Some(cmdline) = matches.get_one::<String>("cmdline") {
        identity = identity.with_command_line(cmdline);
    }
    if let Some(exe) = matches.get_one::<String>("exe") {
        identity = identity.with_executable_path(exe);
    }

    let scope = if matches.get_flag("system") {
        ClassifierScope::System
    } else {
        ClassifierScope::Gpu
    };

    let result = classify(&identity, scope);

    if matches.get_flag("json") {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize classification")?
        );
        return Ok(());
    }

    let category = result.category.as_str();
    let category = if result.is_suspected_miner {
        category.red().bold()
    } else {
        category.green().bold()
    };

    println!("{} {}", "Category:".bold(), category);
    println!("{} {:.2}", "Confidence:".bold(), result.confidence);
    println!("{} {}", "Reason:".bold(), result.reason);
    Ok(())
}
