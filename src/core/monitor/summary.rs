//! Dashboard summaries and the "why is it busy" explanation.

use serde::{Deserialize, Serialize};

use super::classifier::ProcessCategory;
use super::metrics::{
    CpuMetrics, DiskMetrics, GpuDevice, GpuReading, MemoryMetrics, NetworkMetrics, ProcessRecord,
    Snapshot,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSummaryEntry {
    pub id: u32,
    pub name: String,
    pub vendor: String,
    pub utilization: f32,
    pub memory_percent: f32,
    pub temperature: Option<u32>,
    pub process_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSummary {
    pub gpu_count: usize,
    pub monitoring_available: bool,
    pub total_processes: usize,
    pub max_utilization: f32,
    pub max_temperature: Option<u32>,
    pub gpus: Vec<GpuSummaryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GpuSummary {
    pub fn from_snapshot(snapshot: &Snapshot<GpuReading>) -> Self {
        let devices = &snapshot.data.devices;
        if !snapshot.available || devices.is_empty() {
            return Self {
                gpu_count: 0,
                monitoring_available: false,
                total_processes: 0,
                max_utilization: 0.0,
                max_temperature: None,
                gpus: Vec::new(),
                message: Some("No GPUs detected or monitoring unavailable".to_string()),
            };
        }

        Self {
            gpu_count: devices.len(),
            monitoring_available: true,
            total_processes: devices.iter().map(|g| g.processes.len()).sum(),
            max_utilization: devices
                .iter()
                .map(|g| g.utilization_percent)
                .fold(0.0, f32::max),
            max_temperature: devices.iter().filter_map(|g| g.temperature_c).max(),
            gpus: devices
                .iter()
                .map(|g| GpuSummaryEntry {
                    id: g.gpu_id,
                    name: g.name.clone(),
                    vendor: g.vendor.as_str().to_string(),
                    utilization: g.utilization_percent,
                    memory_percent: g.memory_percent,
                    temperature: g.temperature_c,
                    process_count: g.processes.len(),
                })
                .collect(),
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSummary {
    pub usage_percent: f32,
    pub temperature: Option<f32>,
    pub core_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub used_percent: f32,
    pub used_mb: u64,
    pub total_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSummary {
    pub total_disks: usize,
    pub max_usage_percent: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub active_interfaces: usize,
    pub active_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub total_monitored: usize,
    pub intensive_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub monitoring_available: bool,
    pub explanation: String,
    pub cpu: CpuSummary,
    pub memory: MemorySummary,
    pub disk: DiskSummary,
    pub network: NetworkSummary,
    pub processes: ProcessSummary,
    pub platform: String,
}

/// Inputs for [`SystemSummary::build`]; disk and network may be absent
pub struct SystemSummaryInput<'a> {
    pub cpu: &'a Snapshot<CpuMetrics>,
    pub memory: &'a Snapshot<MemoryMetrics>,
    pub processes: &'a Snapshot<Vec<ProcessRecord>>,
    pub disks: Option<&'a Snapshot<Vec<DiskMetrics>>>,
    pub network: Option<&'a Snapshot<NetworkMetrics>>,
    pub platform: &'a str,
}

impl SystemSummary {
    pub fn build(input: SystemSummaryInput<'_>) -> Self {
        let monitoring_available =
            input.cpu.available || input.memory.available || input.processes.available;

        let disks: &[DiskMetrics] = input
            .disks
            .filter(|s| s.available)
            .map(|s| s.data.as_slice())
            .unwrap_or(&[]);
        let network = input.network.filter(|s| s.available).map(|s| &s.data);
        let intensive_count = input
            .processes
            .data
            .iter()
            .filter(|p| p.is_intensive())
            .count();

        let explanation = if monitoring_available {
            explain_load(&input.processes.data)
        } else {
            "Monitoring unavailable".to_string()
        };

        Self {
            monitoring_available,
            explanation,
            cpu: CpuSummary {
                usage_percent: input.cpu.data.usage_percent,
                temperature: input.cpu.data.temperature_celsius,
                core_count: input.cpu.data.core_count,
            },
            memory: MemorySummary {
                used_percent: input.memory.data.used_percent,
                used_mb: input.memory.data.used_mb,
                total_mb: input.memory.data.total_mb,
            },
            disk: DiskSummary {
                total_disks: disks.len(),
                max_usage_percent: disks.iter().map(|d| d.used_percent).fold(0.0, f32::max),
            },
            network: NetworkSummary {
                active_interfaces: network
                    .map(|n| n.interfaces.iter().filter(|i| i.is_up).count())
                    .unwrap_or(0),
                active_connections: network.map(|n| n.active_connections).unwrap_or(0),
            },
            processes: ProcessSummary {
                total_monitored: input.processes.data.len(),
                intensive_count,
            },
            platform: input.platform.to_string(),
        }
    }
}

/// Order and wording of the explanation fragments
const EXPLANATION_ORDER: &[(ProcessCategory, &str)] = &[
    (ProcessCategory::Backup, "backup process(es)"),
    (ProcessCategory::Development, "development/build process(es)"),
    (ProcessCategory::Database, "database process(es)"),
    (ProcessCategory::Gaming, "game(s)"),
    (ProcessCategory::MlTraining, "ML training process(es)"),
    (ProcessCategory::VideoProcessing, "video processing process(es)"),
    (ProcessCategory::Miner, "suspected miner(s)"),
];

/// Explain why the system is loaded from its intensive processes
pub fn explain_load(processes: &[ProcessRecord]) -> String {
    let intensive: Vec<&ProcessRecord> = processes.iter().filter(|p| p.is_intensive()).collect();
    let count_of = |category: ProcessCategory| {
        intensive
            .iter()
            .filter(|p| p.classification.category == category)
            .count()
    };

    let mut parts: Vec<String> = EXPLANATION_ORDER
        .iter()
        .filter_map(|(category, label)| {
            let count = count_of(*category);
            (count > 0).then(|| format!("{} {}", count, label))
        })
        .collect();

    // A couple of unclassified busy processes is normal background noise
    let unknown = count_of(ProcessCategory::Unknown);
    if unknown > 2 {
        parts.push(format!("{} other high-usage process(es)", unknown));
    }

    if parts.is_empty() {
        "System load normal".to_string()
    } else {
        format!("System load high due to: {}", parts.join(", "))
    }
}

/// Status lines worth logging after a GPU refresh: busy devices and their
/// heavy processes.
pub fn gpu_status_lines(devices: &[GpuDevice]) -> Vec<String> {
    let mut lines = Vec::new();
    for gpu in devices {
        if gpu.utilization_percent <= 50.0 && gpu.processes.is_empty() {
            continue;
        }
        let temperature = gpu
            .temperature_c
            .map(|t| format!("{}°C", t))
            .unwrap_or_else(|| "n/a".to_string());
        let processes = match gpu.processes.len() {
            0 => "no processes".to_string(),
            n => format!("{} processes", n),
        };
        lines.push(format!(
            "GPU {} ({}): {:.1}% usage, {:.1}% memory, {}, {}",
            gpu.gpu_id,
            gpu.name,
            gpu.utilization_percent,
            gpu.memory_percent,
            temperature,
            processes
        ));
        for process in gpu.processes.iter().filter(|p| p.gpu_memory_mb > 100) {
            lines.push(format!(
                "  └── PID {} ({}): {}MB GPU memory",
                process.pid, process.name, process.gpu_memory_mb
            ));
        }
    }
    lines
}

/// Status lines worth logging after a system refresh: CPU and memory
/// pressure plus the top three heavy processes.
pub fn system_status_lines(
    cpu: &CpuMetrics,
    memory: &MemoryMetrics,
    processes: &[ProcessRecord],
) -> Vec<String> {
    let mut lines = Vec::new();
    if cpu.usage_percent > 70.0 {
        lines.push(format!("High CPU usage: {:.1}%", cpu.usage_percent));
    }
    if memory.used_percent > 80.0 {
        lines.push(format!("High memory usage: {:.1}%", memory.used_percent));
    }

    let heavy: Vec<&ProcessRecord> = processes
        .iter()
        .filter(|p| p.cpu_percent > 20.0 || p.memory_percent > 10.0)
        .collect();
    if !heavy.is_empty() {
        lines.push(format!(
            "{} resource-intensive processes detected",
            heavy.len()
        ));
        for process in heavy.iter().take(3) {
            lines.push(format!(
                "  └── {} (PID {}): {:.1}% CPU, {:.1}% memory",
                process.name, process.pid, process.cpu_percent, process.memory_percent
            ));
        }
    }
    lines
}

pub fn log_gpu_status(reading: &GpuReading) {
    for line in gpu_status_lines(&reading.devices) {
        log::info!("{}", line);
    }
}

pub fn log_system_status(cpu: &CpuMetrics, memory: &MemoryMetrics, processes: &[ProcessRecord]) {
    for line in system_status_lines(cpu, memory, processes) {
        log::info!("{}", line);
    }
}
