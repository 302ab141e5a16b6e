use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use crate::core::monitor::metrics::{unix_now, GpuDevice, GpuVendor};
use crate::core::monitor::probe::GpuProbe;
use crate::error::{MonitorError, Result};

/// A wedged driver can leave nvidia-smi hanging; it is killed after this
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

const QUERY_FIELDS: &str = "index,name,utilization.gpu,memory.used,memory.total,temperature.gpu,fan.speed,power.draw,power.limit,driver_version";

/// Last-resort probe that always exists
///
/// Reads `nvidia-smi` CSV output when the binary is on PATH; otherwise it
/// reports zero GPUs. There is no process attribution in this mode.
pub struct FallbackProbe {
    nvidia_smi: Option<PathBuf>,
    deadline: Duration,
    /// From the last successful query, so the driver needs no extra spawn
    driver_version: Option<String>,
}

impl FallbackProbe {
    pub fn new() -> Self {
        let nvidia_smi = which::which("nvidia-smi").ok();
        match &nvidia_smi {
            Some(path) => log::info!("Using basic GPU monitoring via {}", path.display()),
            None => log::info!("Using basic GPU monitoring (no nvidia-smi found)"),
        }
        Self::with_binary(nvidia_smi)
    }

    pub fn with_binary(nvidia_smi: Option<PathBuf>) -> Self {
        Self {
            nvidia_smi,
            deadline: QUERY_TIMEOUT,
            driver_version: None,
        }
    }

    fn query(&mut self) -> Result<Vec<GpuDevice>> {
        let Some(binary) = &self.nvidia_smi else {
            return Ok(Vec::new());
        };

        let mut command = Command::new(binary);
        command
            .arg(format!("--query-gpu={}", QUERY_FIELDS))
            .arg("--format=csv,noheader,nounits");
        let output = run_with_deadline(&mut command, self.deadline)?;

        if !output.status.success() {
            return Err(MonitorError::probe_transient(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        let devices = parse_query_output(&String::from_utf8_lossy(&output.stdout));
        if let Some(version) = devices.iter().find_map(|d| d.driver_version.clone()) {
            self.driver_version = Some(version);
        }
        Ok(devices)
    }
}

/// Run a command to completion, killing it once `deadline` passes
fn run_with_deadline(command: &mut Command, deadline: Duration) -> Result<Output> {
    // A few CSV rows fit in the pipe buffer, so polling cannot deadlock
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let started = Instant::now();
    while child.try_wait()?.is_none() {
        if started.elapsed() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MonitorError::ProbeTimeout(deadline.as_millis() as u64));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(child.wait_with_output()?)
}

impl Default for FallbackProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProbe for FallbackProbe {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn vendor(&self) -> GpuVendor {
        if self.nvidia_smi.is_some() {
            GpuVendor::Nvidia
        } else {
            GpuVendor::Unknown
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn count(&mut self) -> Result<u32> {
        Ok(self.query()?.len() as u32)
    }

    fn sample(&mut self, id: Option<u32>) -> Result<Vec<GpuDevice>> {
        let devices = self.query()?;
        Ok(match id {
            Some(id) => devices.into_iter().filter(|d| d.gpu_id == id).collect(),
            None => devices,
        })
    }

    fn driver_version(&mut self) -> Option<String> {
        if self.driver_version.is_none() {
            self.query().ok()?;
        }
        self.driver_version.clone()
    }
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` rows for [`QUERY_FIELDS`]
pub fn parse_query_output(stdout: &str) -> Vec<GpuDevice> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Option<GpuDevice> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() < 10 {
        log::debug!("Skipping malformed nvidia-smi row: {}", line);
        return None;
    }

    let gpu_id: u32 = parts[0].parse().ok()?;
    let memory_used_mb: u64 = field(parts[3]).unwrap_or(0);
    let memory_total_mb: u64 = field(parts[4]).unwrap_or(0);

    Some(GpuDevice {
        gpu_id,
        name: parts[1].to_string(),
        vendor: GpuVendor::Nvidia,
        utilization_percent: field(parts[2]).unwrap_or(0.0),
        memory_used_mb,
        memory_total_mb,
        memory_percent: if memory_total_mb > 0 {
            (memory_used_mb as f32 / memory_total_mb as f32) * 100.0
        } else {
            0.0
        },
        temperature_c: field(parts[5]),
        fan_speed_percent: field(parts[6]),
        power_draw_watts: field(parts[7]),
        power_limit_watts: field(parts[8]),
        driver_version: Some(parts[9].to_string()).filter(|v| field::<String>(v).is_some()),
        processes: Vec::new(),
        timestamp: unix_now(),
    })
}

/// A CSV cell, or `None` for the `[N/A]` / `[Not Supported]` markers
fn field<T: std::str::FromStr>(cell: &str) -> Option<T> {
    if cell.is_empty() || cell.starts_with('[') {
        return None;
    }
    cell.parse().ok()
}
