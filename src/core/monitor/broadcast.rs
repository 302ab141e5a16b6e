//! Event topics, payload shapes and the broadcaster seam.
//!
//! Topic names and payload field names are what subscribers key on, so they
//! stay stable across releases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::alerts::AlertEvent;
use super::cache::MetricsFrame;
use super::metrics::{
    unix_now, CpuMetrics, DiskMetrics, GpuDevice, MemoryMetrics, NetworkMetrics, ProcessRecord,
};
use super::summary::{GpuSummary, SystemSummary, SystemSummaryInput};
use super::urgency::UrgencyTier;
use crate::error::{MonitorError, Result};

/// Processes carried in a system payload
pub const PAYLOAD_PROCESS_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "system:metrics_update")]
    MetricsUpdate,
    #[serde(rename = "system:alerts")]
    Alerts,
    #[serde(rename = "gpu_status_update")]
    GpuStatusUpdate,
    #[serde(rename = "high_gpu_usage_alert")]
    HighGpuUsageAlert,
    #[serde(rename = "system:initial_status")]
    InitialStatus,
    #[serde(rename = "system:monitoring_stats")]
    MonitoringStats,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::MetricsUpdate,
        Topic::Alerts,
        Topic::GpuStatusUpdate,
        Topic::HighGpuUsageAlert,
        Topic::InitialStatus,
        Topic::MonitoringStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MetricsUpdate => "system:metrics_update",
            Topic::Alerts => "system:alerts",
            Topic::GpuStatusUpdate => "gpu_status_update",
            Topic::HighGpuUsageAlert => "high_gpu_usage_alert",
            Topic::InitialStatus => "system:initial_status",
            Topic::MonitoringStats => "system:monitoring_stats",
        }
    }

    pub fn parse(name: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, already-serialized message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new<P: Serialize>(topic: Topic, payload: &P) -> Result<Self> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| MonitorError::emission(topic.as_str(), e.to_string()))?;
        Ok(Self { topic, payload })
    }
}

/// Delivery seam between the engine and whatever transport fans events out
pub trait Broadcaster: Send + Sync {
    fn emit(&self, event: Event) -> Result<()>;
}

/// In-process fan-out over a tokio broadcast channel
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Arc<Event>>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn emit(&self, event: Event) -> Result<()> {
        // Nobody listening is not a delivery failure
        if self.receiver_count() == 0 {
            log::trace!("No subscribers for {}", event.topic);
            return Ok(());
        }
        let topic = event.topic;
        if self.sender.send(Arc::new(event)).is_err() {
            log::trace!("Subscribers for {} went away mid-send", topic);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuPayload {
    pub available: bool,
    pub probe: String,
    pub driver_version: Option<String>,
    pub summary: GpuSummary,
    pub gpus: Vec<GpuDevice>,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GpuPayload {
    pub fn from_frame(frame: &MetricsFrame) -> Self {
        let snapshot = &frame.gpu;
        let available = snapshot.available && !snapshot.data.devices.is_empty();

        Self {
            available,
            probe: snapshot.data.probe.clone(),
            driver_version: snapshot.data.driver_version.clone(),
            summary: GpuSummary::from_snapshot(snapshot),
            gpus: snapshot.data.devices.clone(),
            timestamp: snapshot.captured_at,
            error: (!available).then(|| "GPU monitoring not available".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPayload {
    pub available: bool,
    pub summary: SystemSummary,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub top_processes: Vec<ProcessRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disks: Option<Vec<DiskMetrics>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMetrics>,
    pub timestamp: f64,
}

impl SystemPayload {
    pub fn from_frame(frame: &MetricsFrame, platform: &str) -> Self {
        let summary = SystemSummary::build(SystemSummaryInput {
            cpu: &frame.cpu,
            memory: &frame.memory,
            processes: &frame.processes,
            disks: frame.disks.as_deref(),
            network: frame.network.as_deref(),
            platform,
        });

        Self {
            available: summary.monitoring_available,
            summary,
            cpu: frame.cpu.data.clone(),
            memory: frame.memory.data.clone(),
            top_processes: frame
                .processes
                .data
                .iter()
                .take(PAYLOAD_PROCESS_LIMIT)
                .cloned()
                .collect(),
            disks: frame
                .disks
                .as_ref()
                .filter(|s| s.available)
                .map(|s| s.data.clone()),
            network: frame
                .network
                .as_ref()
                .filter(|s| s.available)
                .map(|s| s.data.clone()),
            timestamp: unix_now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdatePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub urgency: UrgencyTier,
    pub gpu: GpuPayload,
    pub system: SystemPayload,
    pub timestamp: f64,
    pub update_count: u64,
}

impl MetricsUpdatePayload {
    pub fn new(frame: &MetricsFrame, platform: &str, urgency: UrgencyTier, update_count: u64) -> Self {
        Self {
            kind: "metrics_update".to_string(),
            urgency,
            gpu: GpuPayload::from_frame(frame),
            system: SystemPayload::from_frame(frame, platform),
            timestamp: unix_now(),
            update_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsPayload {
    pub alerts: Vec<AlertEvent>,
    pub timestamp: f64,
    pub count: usize,
}

impl AlertsPayload {
    pub fn new(alerts: Vec<AlertEvent>) -> Self {
        Self {
            count: alerts.len(),
            alerts,
            timestamp: unix_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::metrics::{GpuReading, Snapshot};

    #[test]
    fn test_topic_names() {
        for topic in Topic::ALL {
            let json = serde_json::to_value(topic).unwrap();
            assert_eq!(json, topic.as_str());
            assert_eq!(Topic::parse(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::parse("gpu:nope"), None);
    }

    #[test]
    fn test_metrics_update_shape() {
        let payload = MetricsUpdatePayload::new(&MetricsFrame::empty(), "linux", UrgencyTier::Standard, 3);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["type"], "metrics_update");
        assert_eq!(json["urgency"], "standard");
        assert_eq!(json["update_count"], 3);
        assert_eq!(json["gpu"]["available"], false);
        assert!(json["gpu"]["error"].is_string());
        assert_eq!(json["system"]["available"], false);
        assert!(json["system"].get("disks").is_none());
    }

    #[test]
    fn test_gpu_payload_available() {
        let mut frame = MetricsFrame::empty();
        frame.gpu = Arc::new(Snapshot::new(GpuReading {
            probe: "nvml".to_string(),
            driver_version: Some("550.54".to_string()),
            devices: vec![GpuDevice::default()],
        }));

        let payload = GpuPayload::from_frame(&frame);
        assert!(payload.available);
        assert!(payload.error.is_none());
        assert_eq!(payload.summary.gpu_count, 1);
        assert_eq!(payload.probe, "nvml");
    }

    #[test]
    fn test_system_payload_caps_processes() {
        let mut frame = MetricsFrame::empty();
        frame.processes = Arc::new(Snapshot::new(vec![ProcessRecord::default(); 25]));

        let payload = SystemPayload::from_frame(&frame, "linux");
        assert_eq!(payload.top_processes.len(), PAYLOAD_PROCESS_LIMIT);
        assert_eq!(payload.summary.processes.total_monitored, 25);
    }

    #[test]
    fn test_channel_broadcaster_without_subscribers() {
        let broadcaster = ChannelBroadcaster::default();
        assert_eq!(broadcaster.receiver_count(), 0);
        let event = Event::new(Topic::Alerts, &AlertsPayload::new(Vec::new())).unwrap();
        assert!(broadcaster.emit(event).is_ok());
    }

    #[test]
    fn test_channel_broadcaster_drops_events_sent_before_subscribe() {
        let broadcaster = ChannelBroadcaster::default();
        let early = Event::new(Topic::Alerts, &AlertsPayload::new(Vec::new())).unwrap();
        broadcaster.emit(early).unwrap();

        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.receiver_count(), 1);
        assert!(rx.try_recv().is_err());

        let late = Event::new(Topic::MonitoringStats, &serde_json::json!({})).unwrap();
        broadcaster.emit(late).unwrap();
        assert_eq!(rx.try_recv().unwrap().topic, Topic::MonitoringStats);
    }

    #[tokio::test]
    async fn test_channel_broadcaster_delivers() {
        let broadcaster = ChannelBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let event = Event::new(Topic::Alerts, &AlertsPayload::new(Vec::new())).unwrap();
        broadcaster.emit(event).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, Topic::Alerts);
        assert_eq!(received.payload["count"], 0);
    }
}
