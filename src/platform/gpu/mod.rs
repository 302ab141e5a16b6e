//! GPU-specific platform code.
//!
//! Vendor probes for NVIDIA (NVML), AMD (ROCm SMI) and a fallback that
//! shells out to `nvidia-smi`.

mod amd;
mod fallback;
mod nvidia;

pub use amd::AmdProbe;
pub use fallback::{parse_query_output, FallbackProbe};
pub use nvidia::NvidiaProbe;

use crate::core::monitor::probe::GpuProbe;

/// Pick the best available GPU probe
///
/// Tries each supported vendor in order of preference:
/// 1. NVIDIA (via NVML)
/// 2. AMD (via ROCm SMI)
/// 3. Fallback (nvidia-smi, or zero GPUs)
pub fn select_gpu_probe() -> Box<dyn GpuProbe> {
    match NvidiaProbe::new() {
        Ok(probe) if probe.is_available() => {
            log::info!("Using NVIDIA GPU monitoring with process attribution");
            return Box::new(probe);
        }
        Ok(_) => log::debug!("NVML initialized but reports no usable device"),
        Err(e) => log::debug!("NVIDIA probe unavailable: {}", e),
    }

    match AmdProbe::new() {
        Ok(probe) if probe.is_available() => {
            log::info!("Using AMD GPU monitoring");
            return Box::new(probe);
        }
        Ok(_) => log::debug!("ROCm SMI initialized but reports no usable device"),
        Err(e) => log::debug!("AMD probe unavailable: {}", e),
    }

    Box::new(FallbackProbe::new())
}
