use crate::core::monitor::metrics::{GpuDevice, GpuVendor};
use crate::core::monitor::probe::GpuProbe;
use crate::error::{MonitorError, Result};

#[cfg(all(unix, feature = "rocm"))]
use crate::core::monitor::metrics::unix_now;
#[cfg(all(unix, feature = "rocm"))]
use rocm_smi_lib::{DeviceHandle, RocmSmi, TemperatureMetric};

#[cfg(all(unix, feature = "rocm"))]
const MB: u64 = 1024 * 1024;

/// AMD GPU probe using ROCm SMI
///
/// ROCm SMI exposes device metrics only, so devices never carry processes.
pub struct AmdProbe {
    #[cfg(all(unix, feature = "rocm"))]
    rocm: RocmSmi,
    #[cfg(all(unix, feature = "rocm"))]
    device_count: u32,
}

impl AmdProbe {
    pub fn new() -> Result<Self> {
        #[cfg(all(unix, feature = "rocm"))]
        {
            let rocm = RocmSmi::init().map_err(|e| {
                MonitorError::probe_unavailable(format!("Failed to init ROCm SMI: {:?}", e))
            })?;

            let device_count = rocm.get_device_count().map_err(|e| {
                MonitorError::probe_unavailable(format!("Failed to get device count: {:?}", e))
            })? as u32;

            if device_count == 0 {
                return Err(MonitorError::probe_unavailable("ROCm SMI reports no AMD GPUs"));
            }

            Ok(Self { rocm, device_count })
        }
        #[cfg(not(all(unix, feature = "rocm")))]
        {
            Err(MonitorError::probe_unavailable(
                "AMD GPU support not enabled or not on Unix",
            ))
        }
    }

    #[cfg(all(unix, feature = "rocm"))]
    fn get_device(&self, index: u32) -> Result<DeviceHandle> {
        self.rocm.get_device_handle(index).map_err(|e| {
            MonitorError::probe_transient(format!("Failed to get GPU {}: {:?}", index, e))
        })
    }

    #[cfg(all(unix, feature = "rocm"))]
    fn sample_device(&self, index: u32) -> Result<GpuDevice> {
        let device = self.get_device(index)?;

        let memory_used = self.rocm.get_memory_used(&device).unwrap_or(0);
        let memory_total = self.rocm.get_memory_total(&device).unwrap_or(0);

        Ok(GpuDevice {
            gpu_id: index,
            name: self
                .rocm
                .get_device_name(&device)
                .unwrap_or_else(|_| "Unknown AMD GPU".to_string()),
            vendor: GpuVendor::Amd,
            utilization_percent: self.rocm.get_busy_percent(&device).unwrap_or(0) as f32,
            memory_used_mb: memory_used / MB,
            memory_total_mb: memory_total / MB,
            memory_percent: if memory_total > 0 {
                (memory_used as f32 / memory_total as f32) * 100.0
            } else {
                0.0
            },
            temperature_c: self
                .rocm
                .get_temperature(&device, TemperatureMetric::Edge)
                .ok()
                .map(|t| t as u32),
            fan_speed_percent: self.rocm.get_fan_speed(&device, 0).ok().map(|f| f as u32),
            // microwatts to watts
            power_draw_watts: self
                .rocm
                .get_power_average(&device)
                .ok()
                .map(|p| p as f32 / 1_000_000.0),
            power_limit_watts: self
                .rocm
                .get_power_cap(&device)
                .ok()
                .map(|p| p as f32 / 1_000_000.0),
            driver_version: None,
            processes: Vec::new(),
            timestamp: unix_now(),
        })
    }
}

impl GpuProbe for AmdProbe {
    fn name(&self) -> &'static str {
        "rocm-smi"
    }

    fn vendor(&self) -> GpuVendor {
        GpuVendor::Amd
    }

    fn is_available(&self) -> bool {
        #[cfg(all(unix, feature = "rocm"))]
        {
            self.get_device(0).is_ok()
        }
        #[cfg(not(all(unix, feature = "rocm")))]
        {
            false
        }
    }

    fn count(&mut self) -> Result<u32> {
        #[cfg(all(unix, feature = "rocm"))]
        {
            Ok(self.device_count)
        }
        #[cfg(not(all(unix, feature = "rocm")))]
        {
            Err(MonitorError::probe_unavailable(
                "AMD GPU support not enabled or not on Unix",
            ))
        }
    }

    fn sample(&mut self, id: Option<u32>) -> Result<Vec<GpuDevice>> {
        #[cfg(all(unix, feature = "rocm"))]
        {
            match id {
                Some(index) => Ok(vec![self.sample_device(index)?]),
                None => (0..self.device_count)
                    .map(|index| self.sample_device(index))
                    .collect(),
            }
        }
        #[cfg(not(all(unix, feature = "rocm")))]
        {
            let _ = id;
            Err(MonitorError::probe_unavailable(
                "AMD GPU support not enabled or not on Unix",
            ))
        }
    }

    fn driver_version(&mut self) -> Option<String> {
        None
    }
}
