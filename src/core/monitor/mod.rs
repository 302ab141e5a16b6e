//! Real-time GPU and system monitoring.
//!
//! Probes feed a per-domain snapshot cache; a tiered scheduler turns the
//! cached frames into broadcast events while clients are connected.

pub mod alerts;
pub mod broadcast;
pub mod cache;
pub mod classifier;
mod engine;
pub mod metrics;
pub mod probe;
mod registry;
mod scheduler;
pub mod summary;
pub mod urgency;

pub use alerts::{evaluate_alerts, AlertCategory, AlertEvent, AlertProcess, AlertSeverity};
pub use broadcast::{
    AlertsPayload, Broadcaster, ChannelBroadcaster, Event, GpuPayload, MetricsUpdatePayload,
    SystemPayload, Topic,
};
pub use cache::{DomainSnapshot, MetricsCache, MetricsFrame};
pub use classifier::{
    classify, classify_gpu_process, classify_system_process, Classification, ClassifierScope,
    ProcessCategory, ProcessIdentity,
};
pub use engine::{CurrentMetrics, MonitorEngine, StatusSummary};
pub use metrics::{
    CpuMetrics, DiskMetrics, Domain, GpuDevice, GpuReading, GpuVendor, MemoryMetrics,
    NetworkInterface, NetworkMetrics, ProcessRecord, Snapshot,
};
pub use probe::{GpuProbe, SystemProbe};
pub use registry::ClientRegistry;
pub use scheduler::{MonitoringStats, TieredScheduler};
pub use summary::{GpuSummary, SystemSummary};
pub use urgency::{evaluate_urgency, TierClock, UrgencyTier};
