use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

use whybusy::core::config::MonitorConfig;
use whybusy::core::monitor::{
    classify_system_process, Broadcaster, CpuMetrics, DiskMetrics, Event, GpuDevice, GpuProbe,
    GpuVendor, MemoryMetrics, MonitorEngine, NetworkMetrics, ProcessRecord, SystemProbe, Topic,
};
use whybusy::{MonitorError, Result};

struct QuietSystem;

impl SystemProbe for QuietSystem {
    fn sample_cpu(&mut self) -> Result<CpuMetrics> {
        Ok(CpuMetrics {
            usage_percent: 12.0,
            core_count: 8,
            thread_count: 16,
            ..Default::default()
        })
    }

    fn sample_memory(&mut self) -> Result<MemoryMetrics> {
        Ok(MemoryMetrics {
            total_mb: 16384,
            used_mb: 4096,
            used_percent: 25.0,
            ..Default::default()
        })
    }

    fn sample_disks(&mut self) -> Result<Vec<DiskMetrics>> {
        Ok(vec![DiskMetrics {
            mountpoint: "/".to_string(),
            used_percent: 40.0,
            ..Default::default()
        }])
    }

    fn sample_network(&mut self) -> Result<NetworkMetrics> {
        Ok(NetworkMetrics::default())
    }

    fn sample_processes(&mut self, _limit: usize) -> Result<Vec<ProcessRecord>> {
        Ok(Vec::new())
    }

    fn platform(&self) -> String {
        "testos".to_string()
    }
}

/// Fifteen busy compiler processes
struct BuildingSystem;

impl SystemProbe for BuildingSystem {
    fn sample_cpu(&mut self) -> Result<CpuMetrics> {
        QuietSystem.sample_cpu()
    }

    fn sample_memory(&mut self) -> Result<MemoryMetrics> {
        QuietSystem.sample_memory()
    }

    fn sample_disks(&mut self) -> Result<Vec<DiskMetrics>> {
        QuietSystem.sample_disks()
    }

    fn sample_network(&mut self) -> Result<NetworkMetrics> {
        QuietSystem.sample_network()
    }

    fn sample_processes(&mut self, _limit: usize) -> Result<Vec<ProcessRecord>> {
        Ok((0..15)
            .map(|i| {
                let cmd = "cargo build --release";
                ProcessRecord {
                    pid: 1000 + i,
                    name: "cargo".to_string(),
                    cpu_percent: 60.0,
                    command_line: Some(cmd.to_string()),
                    classification: classify_system_process("cargo", Some(cmd), None),
                    ..Default::default()
                }
            })
            .collect())
    }
}

struct BrokenSystem;

impl SystemProbe for BrokenSystem {
    fn sample_cpu(&mut self) -> Result<CpuMetrics> {
        Err(MonitorError::probe_transient("no cpu"))
    }

    fn sample_memory(&mut self) -> Result<MemoryMetrics> {
        Err(MonitorError::probe_transient("no memory"))
    }

    fn sample_disks(&mut self) -> Result<Vec<DiskMetrics>> {
        Err(MonitorError::probe_transient("no disks"))
    }

    fn sample_network(&mut self) -> Result<NetworkMetrics> {
        Err(MonitorError::probe_transient("no network"))
    }

    fn sample_processes(&mut self, _limit: usize) -> Result<Vec<ProcessRecord>> {
        Err(MonitorError::probe_transient("no processes"))
    }
}

/// One GPU running hot and busy
struct HotGpu;

impl GpuProbe for HotGpu {
    fn name(&self) -> &'static str {
        "hot"
    }

    fn vendor(&self) -> GpuVendor {
        GpuVendor::Nvidia
    }

    fn is_available(&self) -> bool {
        true
    }

    fn count(&mut self) -> Result<u32> {
        Ok(1)
    }

    fn sample(&mut self, _id: Option<u32>) -> Result<Vec<GpuDevice>> {
        Ok(vec![GpuDevice {
            gpu_id: 0,
            name: "Test GPU".to_string(),
            vendor: GpuVendor::Nvidia,
            utilization_percent: 95.0,
            memory_used_mb: 6000,
            memory_total_mb: 8000,
            memory_percent: 75.0,
            temperature_c: Some(90),
            ..Default::default()
        }])
    }

    fn driver_version(&mut self) -> Option<String> {
        Some("550.00".to_string())
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Broadcaster for Recorder {
    fn emit(&self, event: Event) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

fn drain(receiver: &mut Receiver<Arc<Event>>) -> Vec<Arc<Event>> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_connect_starts_and_disconnect_stops() {
    let engine = MonitorEngine::with_channel(MonitorConfig::default(), None, Box::new(QuietSystem));
    assert!(!engine.is_active());

    let initial = engine.connect("dashboard").await.unwrap();
    assert!(engine.is_active());
    assert!(!initial.gpu.monitoring_available);
    assert_eq!(
        initial.gpu.message.as_deref(),
        Some("No GPUs detected or monitoring unavailable")
    );
    assert_eq!(initial.system.platform, "testos");
    assert_eq!(initial.system.explanation, "System load normal");

    // Reconnecting the same id does not add a client
    engine.connect("dashboard").await.unwrap();
    assert_eq!(engine.get_monitoring_stats().connected_clients, 1);

    assert!(engine.disconnect("dashboard"));
    assert!(!engine.is_active());
    assert!(!engine.disconnect("dashboard"));
}

#[tokio::test(start_paused = true)]
async fn test_hot_gpu_streams_critical_events() {
    let engine = MonitorEngine::with_channel(
        MonitorConfig::default(),
        Some(Box::new(HotGpu)),
        Box::new(QuietSystem),
    );
    let mut receiver = engine.subscribe().unwrap();

    engine.connect("dashboard").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let events = drain(&mut receiver);
    let topics: Vec<Topic> = events.iter().map(|e| e.topic).collect();
    assert!(topics.contains(&Topic::MetricsUpdate));
    assert!(topics.contains(&Topic::GpuStatusUpdate));
    assert!(topics.contains(&Topic::HighGpuUsageAlert));
    assert!(topics.contains(&Topic::Alerts));

    let update = events
        .iter()
        .find(|e| e.topic == Topic::MetricsUpdate)
        .unwrap();
    assert_eq!(update.payload["type"], "metrics_update");
    assert_eq!(update.payload["urgency"], "critical");
    assert_eq!(update.payload["gpu"]["available"], true);
    assert_eq!(update.payload["gpu"]["driver_version"], "550.00");

    let alerts = events.iter().find(|e| e.topic == Topic::Alerts).unwrap();
    assert_eq!(alerts.payload["count"], 1);
    assert_eq!(alerts.payload["alerts"][0]["category"], "temperature");
    assert_eq!(alerts.payload["alerts"][0]["severity"], "critical");

    // Critical emits every tick
    tokio::time::sleep(Duration::from_secs(3)).await;
    let later = drain(&mut receiver);
    assert!(later.iter().filter(|e| e.topic == Topic::MetricsUpdate).count() >= 3);

    engine.disconnect("dashboard");
}

#[tokio::test(start_paused = true)]
async fn test_no_events_after_last_disconnect() {
    let engine = MonitorEngine::with_channel(MonitorConfig::default(), None, Box::new(QuietSystem));
    let mut receiver = engine.subscribe().unwrap();

    engine.connect("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.disconnect("a");
    tokio::time::sleep(Duration::from_millis(100)).await;
    drain(&mut receiver);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut receiver).is_empty());
    assert!(engine.get_monitoring_stats().update_count >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_without_gpu_probe() {
    let engine =
        MonitorEngine::with_channel(MonitorConfig::default(), None, Box::new(BuildingSystem));
    let metrics = engine.get_metrics(true).await;

    assert!(!metrics.gpu.available);
    assert_eq!(metrics.gpu.error.as_deref(), Some("GPU monitoring not available"));
    assert!(metrics.system.available);
    assert_eq!(metrics.system.top_processes.len(), 10);
    assert!(metrics
        .system
        .summary
        .explanation
        .starts_with("System load high due to:"));
    assert!(metrics.system.summary.explanation.contains("development/build"));
    assert_eq!(metrics.system.disks.as_ref().map(Vec::len), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_failing_probes_degrade_to_unavailable() {
    let engine = MonitorEngine::with_channel(MonitorConfig::default(), None, Box::new(BrokenSystem));
    let summary = engine.get_summary().await;

    assert!(!summary.system.monitoring_available);
    assert_eq!(summary.system.explanation, "Monitoring unavailable");
    assert!(engine.get_monitoring_stats().probe_error_count > 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_broadcaster_receives_forced_update() {
    let recorder = Arc::new(Recorder::default());
    let engine = MonitorEngine::new(
        MonitorConfig::default(),
        Some(Box::new(HotGpu)),
        Box::new(QuietSystem),
        recorder.clone(),
    );
    assert!(engine.subscribe().is_none());

    // Idle engine ignores forced updates
    engine.force_update().await.unwrap();
    assert!(recorder.events.lock().is_empty());

    engine.connect("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let before = recorder.events.lock().len();

    engine.force_update().await.unwrap();
    let events = recorder.events.lock().clone();
    assert!(events.len() > before);
    assert!(events[before..]
        .iter()
        .any(|e| e.topic == Topic::MetricsUpdate && e.payload["urgency"] == "critical"));

    engine.disconnect("a");
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_stats_are_published_to_subscribers() {
    let engine = MonitorEngine::with_channel(MonitorConfig::default(), None, Box::new(QuietSystem));
    let mut receiver = engine.subscribe().unwrap();

    engine.connect("dashboard").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    drain(&mut receiver);

    let stats = engine.publish_monitoring_stats().unwrap();
    let events = drain(&mut receiver);
    let published = events
        .iter()
        .find(|e| e.topic == Topic::MonitoringStats)
        .expect("stats event");
    assert_eq!(published.payload["connected_clients"], 1);
    assert_eq!(published.payload["update_count"], stats.update_count);
    assert_eq!(published.payload["is_running"], true);

    engine.disconnect("dashboard");
}
