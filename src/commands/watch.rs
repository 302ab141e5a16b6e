use crate::core::config::MonitorConfig;
use crate::core::monitor::{Event, MonitorEngine, Topic};
use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;

/// Stream engine events to stdout as JSON lines until Ctrl+C
pub fn execute(matches: &ArgMatches) -> Result<()> {
    let mut config = MonitorConfig::load().context("Failed to load configuration")?;
    if let Some(&interval) = matches.get_one::<u64>("interval") {
        config.update_interval_ms = interval;
    }
    config.validate()?;

    let topics = parse_topics(matches)?;
    let runtime = super::build_runtime()?;
    runtime.block_on(watch(config, topics))
}

/// `None` means every topic
fn parse_topics(matches: &ArgMatches) -> Result<Option<HashSet<Topic>>> {
    let Some(values) = matches.get_many::<String>("topic") else {
        return Ok(None);
    };

    values
        .map(|name| Topic::parse(name).ok_or_else(|| anyhow!("Unknown topic: {}", name)))
        .collect::<Result<HashSet<_>>>()
        .map(Some)
}

async fn watch(config: MonitorConfig, topics: Option<HashSet<Topic>>) -> Result<()> {
    let engine = MonitorEngine::with_default_probes(config);
    let mut events = engine
        .subscribe()
        .context("Monitoring engine has no event channel")?;

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.notify_one())
        .map_err(|e| anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    let client_id = format!("cli-{}", std::process::id());
    let initial = engine.connect(&client_id).await?;
    print_event(&Event::new(Topic::InitialStatus, &initial)?, topics.as_ref())?;

    eprintln!(
        "{} (GPU probe: {}). Press Ctrl+C to stop.",
        "Watching system activity".cyan().bold(),
        engine.gpu_probe_name()
    );

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(&event, topics.as_ref())?,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Output fell behind, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.notified() => break,
        }
    }

    let stats = engine.publish_monitoring_stats()?;
    while let Ok(event) = events.try_recv() {
        print_event(&event, topics.as_ref())?;
    }
    engine.disconnect(&client_id);

    eprintln!(
        "\n{} {} update(s), {} error(s) in {:.0}s",
        "Stopped.".yellow().bold(),
        stats.update_count,
        stats.error_count,
        stats.uptime_seconds
    );
    Ok(())
}

fn print_event(event: &Event, topics: Option<&HashSet<Topic>>) -> Result<()> {
    if topics.is_some_and(|wanted| !wanted.contains(&event.topic)) {
        return Ok(());
    }
    let line = serde_json::to_string(event).context("Failed to serialize event")?;
    println!("{}", line);
    Ok(())
}
