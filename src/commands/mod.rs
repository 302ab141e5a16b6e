// Command handlers module
pub mod classify;
pub mod config;
pub mod summary;
pub mod watch;

use anyhow::{Context, Result};

/// Multi-threaded runtime for commands that drive the engine
pub(crate) fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("whybusy-worker")
        .build()
        .context("Failed to start the async runtime")
}
