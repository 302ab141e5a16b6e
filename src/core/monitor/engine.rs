use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::broadcast::{Broadcaster, ChannelBroadcaster, Event, GpuPayload, SystemPayload, Topic};
use super::cache::{MetricsCache, MetricsFrame};
use super::probe::{GpuProbe, SystemProbe};
use super::registry::ClientRegistry;
use super::scheduler::{MonitoringStats, TieredScheduler};
use super::summary::{GpuSummary, SystemSummary, SystemSummaryInput};
use crate::core::config::MonitorConfig;
use crate::core::monitor::metrics::unix_now;
use crate::error::Result;

/// GPU and system summaries at one point in time
///
/// Also the body of the initial status a client receives on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub gpu: GpuSummary,
    pub system: SystemSummary,
    pub timestamp: f64,
}

/// Full metrics of every domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentMetrics {
    pub gpu: GpuPayload,
    pub system: SystemPayload,
    pub timestamp: f64,
}

struct EngineInner {
    config: MonitorConfig,
    cache: Arc<MetricsCache>,
    registry: Arc<ClientRegistry>,
    scheduler: TieredScheduler,
    broadcaster: Arc<dyn Broadcaster>,
    channel: Option<Arc<ChannelBroadcaster>>,
}

/// Entry point of the monitoring engine. Cheap to clone.
#[derive(Clone)]
pub struct MonitorEngine {
    inner: Arc<EngineInner>,
}

impl MonitorEngine {
    pub fn new(
        config: MonitorConfig,
        gpu_probe: Option<Box<dyn GpuProbe>>,
        system_probe: Box<dyn SystemProbe>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self::build(config, gpu_probe, system_probe, broadcaster, None)
    }

    /// Engine that fans events out over an in-process channel; see [`MonitorEngine::subscribe`]
    pub fn with_channel(
        config: MonitorConfig,
        gpu_probe: Option<Box<dyn GpuProbe>>,
        system_probe: Box<dyn SystemProbe>,
    ) -> Self {
        let channel = Arc::new(ChannelBroadcaster::default());
        Self::build(
            config,
            gpu_probe,
            system_probe,
            channel.clone(),
            Some(channel),
        )
    }

    /// Engine backed by the platform probes and a channel broadcaster
    pub fn with_default_probes(config: MonitorConfig) -> Self {
        let gpu_probe = if config.collect_gpu {
            Some(crate::platform::gpu::select_gpu_probe())
        } else {
            log::info!("GPU collection disabled by configuration");
            None
        };
        let system_probe = Box::new(crate::platform::system::SysinfoProbe::new());

        Self::with_channel(config, gpu_probe, system_probe)
    }

    fn build(
        config: MonitorConfig,
        gpu_probe: Option<Box<dyn GpuProbe>>,
        system_probe: Box<dyn SystemProbe>,
        broadcaster: Arc<dyn Broadcaster>,
        channel: Option<Arc<ChannelBroadcaster>>,
    ) -> Self {
        let cache = Arc::new(MetricsCache::new(&config, gpu_probe, system_probe));
        let registry = Arc::new(ClientRegistry::new());
        let scheduler = TieredScheduler::new(
            &config,
            cache.clone(),
            registry.clone(),
            broadcaster.clone(),
        );

        log::debug!(
            "Monitoring engine ready (gpu probe: {}, platform: {})",
            cache.gpu_probe_name(),
            cache.platform()
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                cache,
                registry,
                scheduler,
                broadcaster,
                channel,
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn gpu_probe_name(&self) -> &'static str {
        self.inner.cache.gpu_probe_name()
    }

    /// Receiver for every emitted event, when backed by the channel broadcaster
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Arc<Event>>> {
        self.inner.channel.as_ref().map(|channel| channel.subscribe())
    }

    pub fn is_active(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    /// Register a client; the first one starts the loop
    pub async fn connect(&self, client_id: &str) -> Result<StatusSummary> {
        let inner = &self.inner;
        if inner
            .registry
            .register(client_id, || inner.scheduler.start())?
        {
            log::info!(
                "Client connected: {} (total: {})",
                client_id,
                inner.registry.len()
            );
        }

        Ok(self.get_summary().await)
    }

    /// Remove a client; the last one stops the loop
    pub fn disconnect(&self, client_id: &str) -> bool {
        let inner = &self.inner;
        let removed = inner
            .registry
            .unregister(client_id, || inner.scheduler.stop());

        if removed {
            log::info!(
                "Client disconnected: {} (remaining: {})",
                client_id,
                inner.registry.len()
            );
        }
        removed
    }

    pub async fn get_summary(&self) -> StatusSummary {
        let frame = self.inner.cache.frame(false, true).await;
        StatusSummary {
            gpu: GpuSummary::from_snapshot(&frame.gpu),
            system: self.system_summary(&frame),
            timestamp: unix_now(),
        }
    }

    pub async fn get_metrics(&self, force_refresh: bool) -> CurrentMetrics {
        let frame = self.inner.cache.frame(force_refresh, true).await;
        CurrentMetrics {
            gpu: GpuPayload::from_frame(&frame),
            system: SystemPayload::from_frame(&frame, self.inner.cache.platform()),
            timestamp: unix_now(),
        }
    }

    pub fn get_monitoring_stats(&self) -> MonitoringStats {
        self.inner.scheduler.get_stats()
    }

    /// Broadcast the current loop statistics on `system:monitoring_stats`
    pub fn publish_monitoring_stats(&self) -> Result<MonitoringStats> {
        let stats = self.get_monitoring_stats();
        self.inner
            .broadcaster
            .emit(Event::new(Topic::MonitoringStats, &stats)?)?;
        Ok(stats)
    }

    pub async fn force_update(&self) -> Result<()> {
        self.inner.scheduler.force_update().await
    }

    fn system_summary(&self, frame: &MetricsFrame) -> SystemSummary {
        SystemSummary::build(SystemSummaryInput {
            cpu: &frame.cpu,
            memory: &frame.memory,
            processes: &frame.processes,
            disks: frame.disks.as_deref(),
            network: frame.network.as_deref(),
            platform: self.inner.cache.platform(),
        })
    }
}
