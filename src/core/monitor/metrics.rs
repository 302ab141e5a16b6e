use serde::{Deserialize, Serialize};
use std::fmt;

use super::classifier::Classification;

/// Current wall-clock time as fractional unix seconds
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Monitoring domains, each with its own cached snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Gpu,
    Cpu,
    Memory,
    Disk,
    Network,
    Processes,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Gpu => "gpu",
            Domain::Cpu => "cpu",
            Domain::Memory => "memory",
            Domain::Disk => "disk",
            Domain::Network => "network",
            Domain::Processes => "processes",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable point-in-time reading for one domain.
///
/// Snapshots are shared as `Arc<Snapshot<T>>` and replaced wholesale; nothing
/// mutates a snapshot after it has been produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub data: T,
    /// Unix seconds, taken after the probe call returned
    pub captured_at: f64,
    pub available: bool,
}

impl<T> Snapshot<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            captured_at: unix_now(),
            available: true,
        }
    }
}

impl<T: Default> Snapshot<T> {
    /// Zeroed snapshot used when a domain has never produced data
    pub fn unavailable() -> Self {
        Self {
            data: T::default(),
            captured_at: unix_now(),
            available: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    #[default]
    Unknown,
}

impl GpuVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Amd => "amd",
            GpuVendor::Intel => "intel",
            GpuVendor::Unknown => "unknown",
        }
    }
}

/// Metrics for one GPU, including the processes attributed to it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub gpu_id: u32,
    pub name: String,
    pub vendor: GpuVendor,
    pub utilization_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_percent: f32,
    pub temperature_c: Option<u32>,
    pub fan_speed_percent: Option<u32>,
    pub power_draw_watts: Option<f32>,
    pub power_limit_watts: Option<f32>,
    pub driver_version: Option<String>,
    pub processes: Vec<ProcessRecord>,
    pub timestamp: f64,
}

impl GpuDevice {
    pub fn has_suspected_miner(&self) -> bool {
        self.processes
            .iter()
            .any(|p| p.classification.is_suspected_miner)
    }
}

/// GPU domain reading: every device the selected probe could see
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    pub probe: String,
    pub driver_version: Option<String>,
    pub devices: Vec<GpuDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage_percent: f32,
    pub per_core_usage: Vec<f32>,
    pub frequency_mhz: Option<u64>,
    pub frequency_max_mhz: Option<u64>,
    pub temperature_celsius: Option<f32>,
    pub load_average: Option<(f64, f64, f64)>, // 1, 5, 15 min
    pub core_count: usize,
    pub thread_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total_mb: u64,
    pub available_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub used_percent: f32,
    pub swap_total_mb: u64,
    pub swap_used_mb: u64,
    pub swap_free_mb: u64,
    pub swap_used_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub device: String,
    pub mountpoint: String,
    pub filesystem: String,
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub used_percent: f32,
    pub read_bytes_per_sec: Option<f64>,
    pub write_bytes_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub bytes_sent_per_sec: Option<f64>,
    pub bytes_recv_per_sec: Option<f64>,
    pub is_up: bool,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub interfaces: Vec<NetworkInterface>,
    pub total_bytes_sent: u64,
    pub total_bytes_recv: u64,
    pub total_bytes_sent_per_sec: Option<f64>,
    pub total_bytes_recv_per_sec: Option<f64>,
    pub active_connections: usize,
}

/// A process together with its resource usage and classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_mb: u64,
    pub memory_percent: f32,
    pub gpu_memory_mb: u64,
    pub gpu_utilization: f32,
    pub status: String,
    pub command_line: Option<String>,
    pub executable_path: Option<String>,
    pub username: Option<String>,
    pub runtime_seconds: Option<u64>,
    pub classification: Classification,
}

impl ProcessRecord {
    /// Whether the process weighs on the system enough to explain load
    pub fn is_intensive(&self) -> bool {
        self.cpu_percent > 15.0 || self.memory_percent > 10.0
    }
}
