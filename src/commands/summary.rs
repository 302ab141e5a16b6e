use crate::core::config::MonitorConfig;
use crate::core::monitor::{CurrentMetrics, GpuPayload, MonitorEngine, ProcessRecord, SystemPayload};
use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::*;
use humansize::{format_size, BINARY};

const MB: u64 = 1024 * 1024;
const SHOWN_PROCESSES: usize = 5;

/// One-shot forced collection, printed as a report or JSON
pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = MonitorConfig::load().context("Failed to load configuration")?;
    let runtime = super::build_runtime()?;

    let metrics = runtime.block_on(async move {
        let engine = MonitorEngine::with_default_probes(config);
        engine.get_metrics(true).await
    });

    if matches.get_flag("json") {
        let json = serde_json::to_string_pretty(&metrics).context("Failed to serialize metrics")?;
        println!("{}", json);
    } else {
        print_report(&metrics);
    }
    Ok(())
}

fn print_report(metrics: &CurrentMetrics) {
    println!("\n{}", "WHY IS IT BUSY".bold().bright_cyan());
    println!("{}", "=".repeat(60));

    let explanation = &metrics.system.summary.explanation;
    if explanation.starts_with("System load high") {
        println!("{}", explanation.yellow().bold());
    } else {
        println!("{}", explanation.green());
    }

    print_system(&metrics.system);
    print_gpu(&metrics.gpu);
    println!();
}

fn print_system(system: &SystemPayload) {
    if !system.available {
        println!("\n{}", "System monitoring unavailable".red());
        return;
    }

    println!("\n{}", "System".bold().green());
    let cpu = &system.cpu;
    print!(
        "  CPU:     {} across {} cores",
        usage(cpu.usage_percent),
        cpu.core_count
    );
    match cpu.temperature_celsius {
        Some(temp) => println!(" ({:.0}°C)", temp),
        None => println!(),
    }

    let memory = &system.memory;
    println!(
        "  Memory:  {} of {} ({})",
        format_size(memory.used_mb * MB, BINARY),
        format_size(memory.total_mb * MB, BINARY),
        usage(memory.used_percent)
    );

    if let Some(disks) = &system.disks {
        for disk in disks {
            println!(
                "  Disk:    {} {} free ({})",
                disk.mountpoint.cyan(),
                format_size(disk.free_mb * MB, BINARY),
                usage(disk.used_percent)
            );
        }
    }

    if let Some(network) = &system.network {
        println!(
            "  Network: {} interface(s), {} connection(s)",
            network.interfaces.len(),
            network.active_connections
        );
    }

    if !system.top_processes.is_empty() {
        println!("\n{}", "Top processes".bold().green());
        for process in system.top_processes.iter().take(SHOWN_PROCESSES) {
            print_process(process);
        }
    }
}

fn print_gpu(gpu: &GpuPayload) {
    println!("\n{}", "GPU".bold().green());
    if !gpu.available {
        let message = gpu
            .summary
            .message
            .as_deref()
            .unwrap_or("GPU monitoring not available");
        println!("  {}", message.dimmed());
        return;
    }

    if let Some(driver) = &gpu.driver_version {
        println!("  Driver:  {} ({})", driver, gpu.probe);
    }

    for device in &gpu.gpus {
        let temperature = device
            .temperature_c
            .map(|t| format!(", {}°C", t))
            .unwrap_or_default();
        println!(
            "  [{}] {}: {} busy, {} of {} memory{}",
            device.gpu_id,
            device.name.bold(),
            usage(device.utilization_percent),
            format_size(device.memory_used_mb * MB, BINARY),
            format_size(device.memory_total_mb * MB, BINARY),
            temperature
        );
        for process in &device.processes {
            print_process(process);
        }
    }
}

fn print_process(process: &ProcessRecord) {
    let category = process.classification.category.as_str();
    let label = if process.classification.is_suspected_miner {
        category.red().bold()
    } else if category == "unknown" {
        category.dimmed()
    } else {
        category.cyan()
    };

    println!(
        "    {:>7}  {:<24} {:>6.1}% cpu  {:>8}  {}",
        process.pid,
        process.name,
        process.cpu_percent,
        format_size(process.memory_mb * MB, BINARY),
        label
    );
}

fn usage(percent: f32) -> ColoredString {
    let text = format!("{:.1}%", percent);
    if percent >= 90.0 {
        text.red().bold()
    } else if percent >= 70.0 {
        text.yellow()
    } else {
        text.green()
    }
}
