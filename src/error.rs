use std::io;
use thiserror::Error;

/// Error type for the monitoring engine and its probes
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The domain has no backing hardware or permission. Permanent for the session.
    #[error("Probe unavailable: {0}")]
    ProbeUnavailable(String),

    /// A single sample attempt failed; the next tick retries.
    #[error("Probe sample failed: {0}")]
    ProbeTransient(String),

    #[error("Probe timed out after {0} ms")]
    ProbeTimeout(u64),

    #[error("Emission failed on {topic}: {reason}")]
    Emission { topic: String, reason: String },

    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
}

/// Result type alias for the monitoring engine
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        MonitorError::Config(msg.into())
    }

    pub fn probe_unavailable<S: Into<String>>(msg: S) -> Self {
        MonitorError::ProbeUnavailable(msg.into())
    }

    pub fn probe_transient<S: Into<String>>(msg: S) -> Self {
        MonitorError::ProbeTransient(msg.into())
    }

    pub fn emission<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        MonitorError::Emission {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn scheduler_unavailable<S: Into<String>>(msg: S) -> Self {
        MonitorError::SchedulerUnavailable(msg.into())
    }

    /// Whether the failure is permanent for this session
    pub fn is_permanent(&self) -> bool {
        matches!(self, MonitorError::ProbeUnavailable(_))
    }
}
