// Platform-specific code module

pub mod gpu;
pub mod system;

pub use gpu::select_gpu_probe;
pub use system::SysinfoProbe;
