// whybusy library - public API

pub mod error;
pub use error::{MonitorError, Result};

pub mod commands;
pub mod core;
pub mod platform;

// Re-export commonly used types
pub use core::config::MonitorConfig;
pub use core::monitor::{MonitorEngine, StatusSummary, Topic};

// Initialize logging
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
