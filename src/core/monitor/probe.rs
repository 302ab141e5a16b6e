use super::metrics::{
    CpuMetrics, DiskMetrics, GpuDevice, GpuVendor, MemoryMetrics, NetworkMetrics, ProcessRecord,
};
use crate::error::Result;

/// Capability interface for GPU metrics sources
///
/// Vendor implementations (NVIDIA, AMD, fallback) live in the platform layer
/// and are picked at startup by probing them in order.
pub trait GpuProbe: Send {
    /// Short name used in logs and payloads
    fn name(&self) -> &'static str;

    fn vendor(&self) -> GpuVendor;

    /// Check if the probe has working hardware/driver access
    fn is_available(&self) -> bool;

    /// Number of GPUs visible to the probe
    fn count(&mut self) -> Result<u32>;

    /// Sample one GPU (`Some(id)`) or every GPU (`None`)
    fn sample(&mut self, id: Option<u32>) -> Result<Vec<GpuDevice>>;

    fn driver_version(&mut self) -> Option<String>;
}

/// OS-level metrics source for the non-GPU domains
pub trait SystemProbe: Send {
    fn sample_cpu(&mut self) -> Result<CpuMetrics>;

    fn sample_memory(&mut self) -> Result<MemoryMetrics>;

    fn sample_disks(&mut self) -> Result<Vec<DiskMetrics>>;

    fn sample_network(&mut self) -> Result<NetworkMetrics>;

    /// Top processes by CPU usage, already classified
    fn sample_processes(&mut self, limit: usize) -> Result<Vec<ProcessRecord>>;

    /// Operating system name for summaries
    fn platform(&self) -> String {
        std::env::consts::OS.to_string()
    }
}
