#[cfg(feature = "nvml")]
use nvml_wrapper::{
    enum_wrappers::device::TemperatureSensor, enums::device::UsedGpuMemory, Device, Nvml,
};
#[cfg(feature = "nvml")]
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};

use crate::core::monitor::metrics::{GpuDevice, GpuVendor};
#[cfg(feature = "nvml")]
use crate::core::monitor::{
    classifier::classify_gpu_process,
    metrics::{unix_now, ProcessRecord},
};
use crate::core::monitor::probe::GpuProbe;
use crate::error::{MonitorError, Result};

#[cfg(feature = "nvml")]
const MB: u64 = 1024 * 1024;

/// NVIDIA GPU probe using NVML, with per-process attribution
pub struct NvidiaProbe {
    #[cfg(feature = "nvml")]
    nvml: Nvml,
    #[cfg(feature = "nvml")]
    system: System,
    #[cfg(feature = "nvml")]
    users: Users,
}

impl NvidiaProbe {
    /// Initialize NVML; fails when no driver or no device is present
    pub fn new() -> Result<Self> {
        #[cfg(feature = "nvml")]
        {
            let nvml = Nvml::init().map_err(|e| {
                MonitorError::probe_unavailable(format!("Failed to init NVML: {}", e))
            })?;

            let count = nvml.device_count().map_err(|e| {
                MonitorError::probe_unavailable(format!("Failed to count NVIDIA GPUs: {}", e))
            })?;
            if count == 0 {
                return Err(MonitorError::probe_unavailable("NVML reports no NVIDIA GPUs"));
            }

            Ok(Self {
                nvml,
                system: System::new(),
                users: Users::new_with_refreshed_list(),
            })
        }
        #[cfg(not(feature = "nvml"))]
        {
            Err(MonitorError::probe_unavailable(
                "NVIDIA GPU support not enabled",
            ))
        }
    }

    #[cfg(feature = "nvml")]
    fn get_device(&self, index: u32) -> Result<Device<'_>> {
        self.nvml.device_by_index(index).map_err(|e| {
            MonitorError::probe_transient(format!("Failed to get GPU {}: {}", index, e))
        })
    }

    #[cfg(feature = "nvml")]
    fn sample_device(&mut self, index: u32, driver_version: Option<String>) -> Result<GpuDevice> {
        let (mut gpu, running) = {
            let device = self.get_device(index)?;

            let memory_info = device.memory_info().map_err(|e| {
                MonitorError::probe_transient(format!("Failed to get memory info: {}", e))
            })?;

            let gpu = GpuDevice {
                gpu_id: index,
                name: device
                    .name()
                    .unwrap_or_else(|_| "Unknown NVIDIA GPU".to_string()),
                vendor: GpuVendor::Nvidia,
                utilization_percent: device
                    .utilization_rates()
                    .map(|u| u.gpu as f32)
                    .unwrap_or(0.0),
                memory_used_mb: memory_info.used / MB,
                memory_total_mb: memory_info.total / MB,
                memory_percent: if memory_info.total > 0 {
                    (memory_info.used as f32 / memory_info.total as f32) * 100.0
                } else {
                    0.0
                },
                temperature_c: device.temperature(TemperatureSensor::Gpu).ok(),
                fan_speed_percent: device.fan_speed(0).ok(),
                power_draw_watts: device.power_usage().map(|p| p as f32 / 1000.0).ok(), // mW to W
                power_limit_watts: device
                    .enforced_power_limit()
                    .map(|p| p as f32 / 1000.0)
                    .ok(),
                driver_version,
                processes: Vec::new(),
                timestamp: unix_now(),
            };

            let running: Vec<(u32, u64)> = device
                .running_compute_processes()
                .map(|procs| {
                    procs
                        .into_iter()
                        .map(|p| {
                            let used = match p.used_gpu_memory {
                                UsedGpuMemory::Used(bytes) => bytes / MB,
                                UsedGpuMemory::Unavailable => 0,
                            };
                            (p.pid, used)
                        })
                        .collect()
                })
                .unwrap_or_else(|e| {
                    log::debug!("Failed to list processes on GPU {}: {}", index, e);
                    Vec::new()
                });

            (gpu, running)
        };

        gpu.processes = self.describe_processes(&running);
        Ok(gpu)
    }

    /// Join NVML's (pid, GPU memory) pairs with OS process details and classify them
    #[cfg(feature = "nvml")]
    fn describe_processes(&mut self, running: &[(u32, u64)]) -> Vec<ProcessRecord> {
        if running.is_empty() {
            return Vec::new();
        }

        let pids: Vec<Pid> = running.iter().map(|(pid, _)| Pid::from_u32(*pid)).collect();
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_exe(UpdateKind::OnlyIfNotSet)
                .with_user(UpdateKind::OnlyIfNotSet),
        );
        let total_memory = self.system.total_memory();

        running
            .iter()
            .map(|&(pid, gpu_memory_mb)| {
                let Some(proc) = self.system.process(Pid::from_u32(pid)) else {
                    log::warn!("Could not access GPU process {}", pid);
                    return ProcessRecord {
                        pid,
                        name: "<unknown>".to_string(),
                        gpu_memory_mb,
                        ..Default::default()
                    };
                };

                let name = proc.name().to_string_lossy().to_string();
                let command_line = crate::platform::system::join_command_line(proc.cmd());
                let executable_path = proc.exe().map(|p| p.to_string_lossy().to_string());
                let classification = classify_gpu_process(
                    &name,
                    command_line.as_deref(),
                    executable_path.as_deref(),
                );

                if classification.confidence > 0.5 {
                    log::info!(
                        "Identified GPU process: {} (PID {}) - {} [{}MB GPU memory]",
                        name,
                        pid,
                        classification.reason,
                        gpu_memory_mb
                    );
                }

                ProcessRecord {
                    pid,
                    cpu_percent: proc.cpu_usage(),
                    memory_mb: proc.memory() / MB,
                    memory_percent: if total_memory > 0 {
                        (proc.memory() as f32 / total_memory as f32) * 100.0
                    } else {
                        0.0
                    },
                    gpu_memory_mb,
                    // NVML has no per-process utilization
                    gpu_utilization: 0.0,
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
                }
            })
            .collect()
    }
}

impl GpuProbe for NvidiaProbe {
    fn name(&self) -> &'static str {
        "nvml"
    }

    fn vendor(&self) -> GpuVendor {
        GpuVendor::Nvidia
    }

    fn is_available(&self) -> bool {
        #[cfg(feature = "nvml")]
        {
            self.nvml.device_count().map(|n| n > 0).unwrap_or(false)
        }
        #[cfg(not(feature = "nvml"))]
        {
            false
        }
    }

    fn count(&mut self) -> Result<u32> {
        #[cfg(feature = "nvml")]
        {
            self.nvml.device_count().map_err(|e| {
                MonitorError::probe_transient(format!("Failed to count NVIDIA GPUs: {}", e))
            })
        }
        #[cfg(not(feature = "nvml"))]
        {
            Err(MonitorError::probe_unavailable(
                "NVIDIA GPU support not enabled",
            ))
        }
    }

    fn sample(&mut self, id: Option<u32>) -> Result<Vec<GpuDevice>> {
        #[cfg(feature = "nvml")]
        {
            let driver_version = self.driver_version();
            let ids: Vec<u32> = match id {
                Some(id) => vec![id],
                None => (0..self.count()?).collect(),
            };

            ids.into_iter()
                .map(|index| self.sample_device(index, driver_version.clone()))
                .collect()
        }
        #[cfg(not(feature = "nvml"))]
        {
            let _ = id;
            Err(MonitorError::probe_unavailable(
                "NVIDIA GPU support not enabled",
            ))
        }
    }

    fn driver_version(&mut self) -> Option<String> {
        #[cfg(feature = "nvml")]
        {
            self.nvml.sys_driver_version().ok()
        }
        #[cfg(not(feature = "nvml"))]
        {
            None
        }
    }
}
