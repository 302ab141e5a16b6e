//! OS metrics through `sysinfo`.

use std::collections::HashMap;
use std::time::Instant;

use sysinfo::{
    Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind,
    ProcessesToUpdate, RefreshKind, System, UpdateKind, Users,
};

use crate::core::monitor::classifier::classify_system_process;
use crate::core::monitor::metrics::{
    CpuMetrics, DiskMetrics, MemoryMetrics, NetworkInterface, NetworkMetrics, ProcessRecord,
};
use crate::core::monitor::probe::SystemProbe;
use crate::error::Result;

const MB: u64 = 1024 * 1024;

/// Filesystems that never back real storage
const PSEUDO_FILESYSTEMS: &[&str] = &["devfs", "proc", "sysfs", "tmpfs", "devtmpfs"];

/// Sensor labels that belong to the CPU package or its cores
const CPU_SENSOR_KEYWORDS: &[&str] = &["cpu", "core", "package", "tctl", "processor"];

/// Below both of these a process is idle noise
const PROCESS_MIN_CPU: f32 = 0.1;
const PROCESS_MIN_MEMORY: f32 = 0.1;

/// Probe that reads CPU, memory, disks, network and processes via sysinfo
pub struct SysinfoProbe {
    system: System,
    components: Components,
    disks: Disks,
    networks: Networks,
    users: Users,
    /// CPU usage needs two refreshes before it is meaningful
    cpu_primed: bool,
    processes_primed: bool,
    last_network_update: Option<Instant>,
    last_network_values: HashMap<String, (u64, u64)>, // (sent, recv) per interface
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());

        Self {
            system: System::new_with_specifics(refresh_kind),
            components: Components::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            users: Users::new_with_refreshed_list(),
            cpu_primed: false,
            processes_primed: false,
            last_network_update: None,
            last_network_values: HashMap::new(),
        }
    }

    fn process_refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing()
            .with_cpu()
            .with_memory()
            .with_cmd(UpdateKind::OnlyIfNotSet)
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_user(UpdateKind::OnlyIfNotSet)
    }

    fn cpu_temperature(&mut self) -> Option<f32> {
        self.components.refresh(true);
        self.components
            .iter()
            .filter(|c| is_cpu_sensor(c.label()))
            .find_map(|c| c.temperature())
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn sample_cpu(&mut self) -> Result<CpuMetrics> {
        self.system.refresh_cpu_all();
        if !self.cpu_primed {
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            self.system.refresh_cpu_all();
            self.cpu_primed = true;
        }

        let temperature_celsius = self.cpu_temperature();
        let cpus = self.system.cpus();
        let load = System::load_average();
        let load_average = if cfg!(windows) {
            None
        } else {
            Some((load.one, load.five, load.fifteen))
        };

        Ok(CpuMetrics {
            usage_percent: self.system.global_cpu_usage(),
            per_core_usage: cpus.iter().map(|cpu| cpu.cpu_usage()).collect(),
            frequency_mhz: cpus.first().map(|cpu| cpu.frequency()).filter(|f| *f > 0),
            frequency_max_mhz: cpus.iter().map(|cpu| cpu.frequency()).max().filter(|f| *f > 0),
            temperature_celsius,
            load_average,
            core_count: System::physical_core_count().unwrap_or(cpus.len()),
            thread_count: cpus.len(),
        })
    }

    fn sample_memory(&mut self) -> Result<MemoryMetrics> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let swap_total = self.system.total_swap();
        let swap_used = self.system.used_swap();

        Ok(MemoryMetrics {
            total_mb: total / MB,
            available_mb: self.system.available_memory() / MB,
            used_mb: used / MB,
            free_mb: self.system.free_memory() / MB,
            used_percent: percent(used, total),
            swap_total_mb: swap_total / MB,
            swap_used_mb: swap_used / MB,
            swap_free_mb: self.system.free_swap() / MB,
            swap_used_percent: percent(swap_used, swap_total),
        })
    }

    fn sample_disks(&mut self) -> Result<Vec<DiskMetrics>> {
        self.disks.refresh(true);

        Ok(self
            .disks
            .iter()
            .filter(|disk| !is_pseudo_filesystem(&disk.file_system().to_string_lossy()))
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let total = disk.total_space();
                let free = disk.available_space();
                let used = total.saturating_sub(free);

                DiskMetrics {
                    device: disk.name().to_string_lossy().to_string(),
                    mountpoint: disk.mount_point().to_string_lossy().to_string(),
                    filesystem: disk.file_system().to_string_lossy().to_string(),
                    total_mb: total / MB,
                    used_mb: used / MB,
                    free_mb: free / MB,
                    used_percent: percent(used, total),
                    read_bytes_per_sec: None,
                    write_bytes_per_sec: None,
                }
            })
            .collect())
    }

    fn sample_network(&mut self) -> Result<NetworkMetrics> {
        self.networks.refresh(true);

        let now = Instant::now();
        let elapsed_secs = self
            .last_network_update
            .map(|t| now.duration_since(t).as_secs_f64());

        let mut metrics = NetworkMetrics::default();
        let mut current_values = HashMap::new();
        let mut sent_rate_total = 0.0;
        let mut recv_rate_total = 0.0;

        for (name, data) in self.networks.iter() {
            if is_loopback(name) {
                continue;
            }

            let sent = data.total_transmitted();
            let recv = data.total_received();
            let previous = self.last_network_values.get(name).copied();

            let (sent_rate, recv_rate) = match (previous, elapsed_secs) {
                (Some((prev_sent, prev_recv)), Some(secs)) => {
                    (rate(sent, prev_sent, secs), rate(recv, prev_recv, secs))
                }
                _ => (None, None),
            };
            sent_rate_total += sent_rate.unwrap_or(0.0);
            recv_rate_total += recv_rate.unwrap_or(0.0);

            let addresses: Vec<String> = data
                .ip_networks()
                .iter()
                .map(|net| net.addr.to_string())
                .collect();

            metrics.interfaces.push(NetworkInterface {
                name: name.to_string(),
                bytes_sent: sent,
                bytes_recv: recv,
                packets_sent: data.total_packets_transmitted(),
                packets_recv: data.total_packets_received(),
                bytes_sent_per_sec: sent_rate,
                bytes_recv_per_sec: recv_rate,
                is_up: !addresses.is_empty(),
                addresses,
            });
            metrics.total_bytes_sent += sent;
            metrics.total_bytes_recv += recv;
            current_values.insert(name.to_string(), (sent, recv));
        }

        if elapsed_secs.is_some() {
            metrics.total_bytes_sent_per_sec = Some(sent_rate_total);
            metrics.total_bytes_recv_per_sec = Some(recv_rate_total);
        }
        metrics.interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        metrics.active_connections = active_connections();

        self.last_network_update = Some(now);
        self.last_network_values = current_values;

        Ok(metrics)
    }

    fn sample_processes(&mut self, limit: usize) -> Result<Vec<ProcessRecord>> {
        let refresh_kind = Self::process_refresh_kind();
        self.system.refresh_memory();
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind);
        if !self.processes_primed {
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            self.system
                .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind);
            self.processes_primed = true;
        }

        let total_memory = self.system.total_memory();
        let mut processes: Vec<ProcessRecord> = self
            .system
            .processes()
            .values()
            .filter_map(|proc| {
                let cpu_percent = proc.cpu_usage();
                let memory_percent = percent(proc.memory(), total_memory);
                if !keep_process(cpu_percent, memory_percent) {
                    return None;
                }

                let name = proc.name().to_string_lossy().to_string();
                let command_line = join_command_line(proc.cmd());
                let executable_path = proc.exe().map(|p| p.to_string_lossy().to_string());
                let classification = classify_system_process(
                    &name,
                    command_line.as_deref(),
                    executable_path.as_deref(),
                );

                Some(ProcessRecord {
                    pid: proc.pid().as_u32(),
                    cpu_percent,
                    memory_mb: proc.memory() / MB,
                    memory_percent,
                    status: proc.status().to_string(),
                    username: proc
                        .user_id()
                        .and_then(|uid| self.users.get_user_by_id(uid))
                        .map(|user| user.name().to_string()),
                    runtime_seconds: Some(proc.run_time()),
                    command_line,
                    executable_path,
                    classification,
                    name,
                    ..Default::default()
                })
            })
            .collect();

        // Sort by CPU usage descending
        processes.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        processes.truncate(limit);

        Ok(processes)
    }
}

fn percent(part: u64, total: u64) -> f32 {
    if total > 0 {
        (part as f32 / total as f32) * 100.0
    } else {
        0.0
    }
}

/// Bytes per second between two counter readings; `None` when the counter went backwards
fn rate(current: u64, previous: u64, elapsed_secs: f64) -> Option<f64> {
    if elapsed_secs <= 0.0 || current < previous {
        return None;
    }
    Some((current - previous) as f64 / elapsed_secs)
}

fn is_pseudo_filesystem(fs: &str) -> bool {
    PSEUDO_FILESYSTEMS.contains(&fs)
}

fn is_loopback(interface: &str) -> bool {
    interface.starts_with("lo")
}

fn is_cpu_sensor(label: &str) -> bool {
    let label = label.to_lowercase();
    CPU_SENSOR_KEYWORDS.iter().any(|k| label.contains(k))
}

fn keep_process(cpu_percent: f32, memory_percent: f32) -> bool {
    cpu_percent >= PROCESS_MIN_CPU || memory_percent >= PROCESS_MIN_MEMORY
}

pub(crate) fn join_command_line(parts: &[std::ffi::OsString]) -> Option<String> {
    let joined = parts
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// Open sockets, read from the kernel tables where the OS exposes them
fn active_connections() -> usize {
    #[cfg(target_os = "linux")]
    {
        ["/proc/net/tcp", "/proc/net/tcp6", "/proc/net/udp", "/proc/net/udp6"]
            .iter()
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .map(|table| count_socket_entries(&table))
            .sum()
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

/// Rows of a /proc/net socket table, minus its header
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn count_socket_entries(table: &str) -> usize {
    table
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count()
}
