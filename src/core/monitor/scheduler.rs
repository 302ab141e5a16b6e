//! Tiered broadcast loop.
//!
//! A single tokio task samples the cache once per tick, derives the urgency
//! tier and emits whatever tiers are due. The loop idles while no client is
//! registered and stops on an explicit shutdown signal, checked between
//! cycles. A cycle that fails or panics costs one error backoff.

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::alerts::{evaluate_alerts, AlertEvent};
use super::broadcast::{AlertsPayload, Broadcaster, Event, MetricsUpdatePayload, Topic};
use super::cache::{MetricsCache, MetricsFrame};
use super::registry::ClientRegistry;
use super::summary::GpuSummary;
use super::urgency::{evaluate_urgency, TierClock, UrgencyTier};
use crate::core::config::MonitorConfig;
use crate::error::{MonitorError, Result};

/// Runtime statistics of the monitoring loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringStats {
    pub active: bool,
    pub connected_clients: usize,
    pub update_count: u64,
    pub error_count: u64,
    pub probe_error_count: u64,
    pub uptime_seconds: f64,
    pub updates_per_minute: f64,
    pub error_rate: f64,
}

struct Shared {
    cache: Arc<MetricsCache>,
    registry: Arc<ClientRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    tick: Duration,
    idle_poll: Duration,
    error_backoff: Duration,
    clock: Mutex<TierClock>,
    update_count: AtomicU64,
    error_count: AtomicU64,
    created_at: Instant,
}

struct RunHandle {
    shutdown_tx: broadcast::Sender<()>,
    _join: JoinHandle<()>,
}

pub struct TieredScheduler {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
}

impl TieredScheduler {
    pub fn new(
        config: &MonitorConfig,
        cache: Arc<MetricsCache>,
        registry: Arc<ClientRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                registry,
                broadcaster,
                tick: config.tick(),
                idle_poll: config.idle_poll(),
                error_backoff: config.error_backoff(),
                clock: Mutex::new(TierClock::new()),
                update_count: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                created_at: Instant::now(),
            }),
            run: Mutex::new(None),
        }
    }

    /// Spawn the loop on the current tokio runtime. No-op when running.
    pub fn start(&self) -> Result<()> {
        let mut run = self.run.lock();
        if run.is_some() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            MonitorError::scheduler_unavailable(format!("no tokio runtime to run on: {}", e))
        })?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let shared = self.shared.clone();
        let join = handle.spawn(async move { shared.run_loop(shutdown_rx).await });

        *run = Some(RunHandle {
            shutdown_tx,
            _join: join,
        });
        log::info!("Real-time monitoring started");
        Ok(())
    }

    /// Signal the loop to exit. An in-flight cycle completes first.
    pub fn stop(&self) {
        if let Some(run) = self.run.lock().take() {
            let _ = run.shutdown_tx.send(());
            log::info!("Real-time monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Emit immediately regardless of tier gating, with fresh samples
    pub async fn force_update(&self) -> Result<()> {
        if !self.is_running() {
            log::warn!("Cannot force update - monitoring not active");
            return Ok(());
        }

        let frame = self.shared.cache.frame(true, false).await;
        self.shared.emit_metrics(UrgencyTier::Critical, &frame)?;
        self.shared.emit_gpu_status(&frame)?;
        self.shared.emit_alerts(&evaluate_alerts(&frame))?;
        log::info!("Forced metrics update completed");
        Ok(())
    }

    pub fn get_stats(&self) -> MonitoringStats {
        let shared = &self.shared;
        let update_count = shared.update_count.load(Ordering::Relaxed);
        let error_count = shared.error_count.load(Ordering::Relaxed);
        let uptime_seconds = shared.created_at.elapsed().as_secs_f64();

        MonitoringStats {
            active: self.is_running(),
            connected_clients: shared.registry.len(),
            update_count,
            error_count,
            probe_error_count: shared.cache.probe_error_count(),
            uptime_seconds,
            updates_per_minute: if uptime_seconds > 0.0 {
                update_count as f64 / uptime_seconds * 60.0
            } else {
                0.0
            },
            error_rate: if update_count > 0 {
                error_count as f64 / update_count as f64
            } else {
                0.0
            },
        }
    }
}

impl Drop for TieredScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        log::debug!("Monitoring loop entered");

        loop {
            if self.registry.is_empty() {
                if sleep_or_shutdown(self.idle_poll, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let pause = match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(())) => self.tick,
                Ok(Err(e)) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    log::error!("Error in monitoring loop: {}", e);
                    self.error_backoff
                }
                Err(panic) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    log::error!("Monitoring cycle panicked: {}", panic_message(&*panic));
                    self.error_backoff
                }
            };

            if sleep_or_shutdown(pause, &mut shutdown).await {
                break;
            }
        }

        log::debug!("Monitoring loop exited");
    }

    async fn run_cycle(&self) -> Result<()> {
        let frame = self.cache.frame(false, false).await;
        let urgency = evaluate_urgency(&frame);
        let now = Instant::now();

        let due: Vec<UrgencyTier> = {
            let clock = self.clock.lock();
            [urgency, UrgencyTier::Background]
                .into_iter()
                .filter(|tier| clock.should_emit(*tier, now))
                .collect()
        };

        for tier in &due {
            if *tier == UrgencyTier::Background {
                let (disks, network) =
                    tokio::join!(self.cache.disks(false), self.cache.network(false));
                let background = MetricsFrame {
                    disks: Some(disks),
                    network: Some(network),
                    ..frame.clone()
                };
                self.emit_metrics(*tier, &background)?;
            } else {
                self.emit_metrics(*tier, &frame)?;
            }
            self.clock.lock().mark_emitted(*tier, now);
        }

        if !due.is_empty() {
            self.emit_gpu_status(&frame)?;
            self.emit_alerts(&evaluate_alerts(&frame))?;
        }

        self.update_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn emit_metrics(&self, urgency: UrgencyTier, frame: &MetricsFrame) -> Result<()> {
        let payload = MetricsUpdatePayload::new(
            frame,
            self.cache.platform(),
            urgency,
            self.update_count.load(Ordering::Relaxed),
        );
        self.dispatch(Event::new(Topic::MetricsUpdate, &payload)?);
        log::trace!("Emitted {} metrics update", urgency);
        Ok(())
    }

    /// At most one per cycle, whatever number of tiers were due
    fn emit_gpu_status(&self, frame: &MetricsFrame) -> Result<()> {
        let gpu = &frame.gpu;
        if gpu.available && !gpu.data.devices.is_empty() {
            let summary = GpuSummary::from_snapshot(gpu);
            self.dispatch(Event::new(Topic::GpuStatusUpdate, &summary)?);
        }
        Ok(())
    }

    fn emit_alerts(&self, alerts: &[AlertEvent]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }

        let legacy = alerts.iter().any(AlertEvent::is_gpu_legacy);
        let payload = AlertsPayload::new(alerts.to_vec());
        let event = Event::new(Topic::Alerts, &payload)?;

        if legacy {
            self.dispatch(Event {
                topic: Topic::HighGpuUsageAlert,
                payload: event.payload.clone(),
            });
        }
        self.dispatch(event);

        log::info!("Emitted {} alert(s)", alerts.len());
        Ok(())
    }

    /// Delivery failures are logged; they never abort a cycle
    fn dispatch(&self, event: Event) {
        let topic = event.topic;
        if let Err(e) = self.broadcaster.emit(event) {
            log::warn!("Failed to emit {}: {}", topic, e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Sleep for `duration`; true when shutdown was signalled first
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.recv() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::classifier::classify_gpu_process;
    use crate::core::monitor::metrics::{
        CpuMetrics, DiskMetrics, GpuDevice, GpuVendor, MemoryMetrics, NetworkMetrics,
        ProcessRecord,
    };
    use crate::core::monitor::probe::{GpuProbe, SystemProbe};
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn topics(&self) -> Vec<Topic> {
            self.events.lock().iter().map(|e| e.topic).collect()
        }

        fn count(&self, topic: Topic) -> usize {
            self.events.lock().iter().filter(|e| e.topic == topic).count()
        }
    }

    impl Broadcaster for Recorder {
        fn emit(&self, event: Event) -> Result<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    struct QuietSystem {
        calls: Arc<AtomicU64>,
    }

    impl SystemProbe for QuietSystem {
        fn sample_cpu(&mut self) -> Result<CpuMetrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CpuMetrics {
                usage_percent: 10.0,
                ..Default::default()
            })
        }

        fn sample_memory(&mut self) -> Result<MemoryMetrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(MemoryMetrics {
                used_percent: 30.0,
                ..Default::default()
            })
        }

        fn sample_disks(&mut self) -> Result<Vec<DiskMetrics>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn sample_network(&mut self) -> Result<NetworkMetrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NetworkMetrics::default())
        }

        fn sample_processes(&mut self, _limit: usize) -> Result<Vec<ProcessRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct MinerGpu;

    impl GpuProbe for MinerGpu {
        fn name(&self) -> &'static str {
            "mock"
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
            let cmd = "xmrig --config=config.json";
            Ok(vec![GpuDevice {
                gpu_id: 0,
                temperature_c: Some(55),
                processes: vec![ProcessRecord {
                    pid: 4321,
                    name: "xmrig".to_string(),
                    command_line: Some(cmd.to_string()),
                    classification: classify_gpu_process("xmrig", Some(cmd), None),
                    ..Default::default()
                }],
                ..Default::default()
            }])
        }

        fn driver_version(&mut self) -> Option<String> {
            None
        }
    }

    /// Blows up on its first delivery, records afterwards
    #[derive(Default)]
    struct FlakyBroadcaster {
        tripped: AtomicBool,
        events: Mutex<Vec<Event>>,
    }

    impl FlakyBroadcaster {
        fn count(&self, topic: Topic) -> usize {
            self.events.lock().iter().filter(|e| e.topic == topic).count()
        }
    }

    impl Broadcaster for FlakyBroadcaster {
        fn emit(&self, event: Event) -> Result<()> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("transport exploded");
            }
            self.events.lock().push(event);
            Ok(())
        }
    }

    /// Holds its first sample until the test releases it
    struct GatedGpu {
        entered: mpsc::Sender<()>,
        release: Option<mpsc::Receiver<()>>,
    }

    impl GpuProbe for GatedGpu {
        fn name(&self) -> &'static str {
            "gated"
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
            if let Some(release) = self.release.take() {
                let _ = self.entered.send(());
                let _ = release.recv();
            }
            Ok(vec![GpuDevice::default()])
        }

        fn driver_version(&mut self) -> Option<String> {
            None
        }
    }

    fn scheduler_with(
        gpu: Option<Box<dyn GpuProbe>>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> (TieredScheduler, Arc<ClientRegistry>) {
        let config = MonitorConfig::default();
        let calls = Arc::new(AtomicU64::new(0));
        let cache = Arc::new(MetricsCache::new(&config, gpu, Box::new(QuietSystem { calls })));
        let registry = Arc::new(ClientRegistry::new());
        let scheduler = TieredScheduler::new(&config, cache, registry.clone(), broadcaster);
        (scheduler, registry)
    }

    fn scheduler(
        gpu: Option<Box<dyn GpuProbe>>,
        calls: Arc<AtomicU64>,
    ) -> (TieredScheduler, Arc<ClientRegistry>, Arc<Recorder>) {
        let config = MonitorConfig::default();
        let cache = Arc::new(MetricsCache::new(&config, gpu, Box::new(QuietSystem { calls })));
        let registry = Arc::new(ClientRegistry::new());
        let recorder = Arc::new(Recorder::default());
        let scheduler = TieredScheduler::new(&config, cache, registry.clone(), recorder.clone());
        (scheduler, registry, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_probing_while_idle() {
        let calls = Arc::new(AtomicU64::new(0));
        let (scheduler, _registry, recorder) = scheduler(None, calls.clone());

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(scheduler.is_running());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(recorder.topics().is_empty());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_emits_standard_and_background() {
        let calls = Arc::new(AtomicU64::new(0));
        let (scheduler, registry, recorder) = scheduler(None, calls);

        registry.register("client", || scheduler.start()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let events = recorder.events.lock().clone();
        let urgencies: Vec<String> = events
            .iter()
            .filter(|e| e.topic == Topic::MetricsUpdate)
            .map(|e| e.payload["urgency"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(urgencies, vec!["standard", "background"]);

        let background = &events[1].payload;
        assert!(background["system"]["disks"].is_array());
        assert!(events[0].payload["system"].get("disks").is_none());
        assert_eq!(recorder.count(Topic::GpuStatusUpdate), 0);
        assert_eq!(scheduler.get_stats().update_count, 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_tier_is_gated() {
        let calls = Arc::new(AtomicU64::new(0));
        let (scheduler, registry, recorder) = scheduler(None, calls);

        registry.register("client", || scheduler.start()).unwrap();
        // Cycles at t=0..=4.5s: standard emits at 0s only, background at 0s only
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(recorder.count(Topic::MetricsUpdate), 2);

        // t=5s brings the next standard emission
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.count(Topic::MetricsUpdate), 3);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_miner_raises_security_alert() {
        let calls = Arc::new(AtomicU64::new(0));
        let (scheduler, registry, recorder) = scheduler(Some(Box::new(MinerGpu)), calls);

        registry.register("client", || scheduler.start()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let events = recorder.events.lock().clone();
        let alerts = events
            .iter()
            .find(|e| e.topic == Topic::Alerts)
            .expect("alerts emitted");
        assert_eq!(alerts.payload["count"], 1);
        assert_eq!(alerts.payload["alerts"][0]["category"], "security");
        assert_eq!(alerts.payload["alerts"][0]["process"]["pid"], 4321);

        assert_eq!(recorder.count(Topic::HighGpuUsageAlert), 1);
        assert_eq!(recorder.count(Topic::Alerts), 1);
        // Critical and background were both due; status still goes out once
        assert_eq!(recorder.count(Topic::GpuStatusUpdate), 1);

        let first_update = events
            .iter()
            .find(|e| e.topic == Topic::MetricsUpdate)
            .expect("metrics emitted");
        assert_eq!(first_update.payload["urgency"], "critical");
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_client_stops_loop() {
        let calls = Arc::new(AtomicU64::new(0));
        let (scheduler, registry, recorder) = scheduler(None, calls.clone());

        registry.register("a", || scheduler.start()).unwrap();
        registry.register("b", || scheduler.start()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        registry.unregister("a", || scheduler.stop());
        assert!(scheduler.is_running());
        registry.unregister("b", || scheduler.stop());
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let probes = calls.load(Ordering::SeqCst);
        let emitted = recorder.topics().len();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), probes);
        assert_eq!(recorder.topics().len(), emitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_update_when_idle_is_noop() {
        let calls = Arc::new(AtomicU64::new(0));
        let (scheduler, _registry, recorder) = scheduler(None, calls.clone());

        scheduler.force_update().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(recorder.topics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_update_bypasses_gating() {
        let calls = Arc::new(AtomicU64::new(0));
        let (scheduler, registry, recorder) = scheduler(None, calls);

        registry.register("client", || scheduler.start()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let before = recorder.count(Topic::MetricsUpdate);

        scheduler.force_update().await.unwrap();
        let events = recorder.events.lock().clone();
        let last = events.last().expect("forced update emitted");
        assert_eq!(recorder.count(Topic::MetricsUpdate), before + 1);
        assert_eq!(last.payload["urgency"], "critical");
        scheduler.stop();
    }

    #[test]
    fn test_start_without_runtime() {
        let (scheduler, _registry, _recorder) = scheduler(None, Arc::new(AtomicU64::new(0)));
        assert!(matches!(
            scheduler.start(),
            Err(MonitorError::SchedulerUnavailable(_))
        ));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_are_well_formed() {
        let (scheduler, _registry, _recorder) = scheduler(None, Arc::new(AtomicU64::new(0)));
        let stats = scheduler.get_stats();
        assert!(!stats.active);
        assert_eq!(stats.connected_clients, 0);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.updates_per_minute, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_panic_keeps_loop_alive() {
        let broadcaster = Arc::new(FlakyBroadcaster::default());
        let (scheduler, registry) = scheduler_with(None, broadcaster.clone());

        registry.register("client", || scheduler.start()).unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(scheduler.is_running());
        assert_eq!(scheduler.get_stats().error_count, 1);
        assert!(broadcaster.count(Topic::MetricsUpdate) >= 3);
        assert!(scheduler.get_stats().update_count >= 10);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_backs_off_before_retrying() {
        let broadcaster = Arc::new(FlakyBroadcaster::default());
        let (scheduler, registry) = scheduler_with(None, broadcaster.clone());

        registry.register("client", || scheduler.start()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stats = scheduler.get_stats();
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.update_count, 0);
        assert!(broadcaster.events.lock().is_empty());

        // Still inside the 5s error backoff
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(broadcaster.events.lock().is_empty());

        // The retry at t=5s emits both tiers that never went out
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(broadcaster.count(Topic::MetricsUpdate), 2);
        let stats = scheduler.get_stats();
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.update_count, 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_running_cycle_finish() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gpu = GatedGpu {
            entered: entered_tx,
            release: Some(release_rx),
        };
        let recorder = Arc::new(Recorder::default());
        let (scheduler, registry) = scheduler_with(Some(Box::new(gpu)), recorder.clone());

        registry.register("client", || scheduler.start()).unwrap();
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        scheduler.stop();
        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(scheduler.get_stats().update_count, 1);
        assert!(recorder.count(Topic::MetricsUpdate) >= 1);
        assert_eq!(recorder.count(Topic::GpuStatusUpdate), 1);

        // Nothing after the finished cycle
        let emitted = recorder.topics().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.topics().len(), emitted);
        assert_eq!(scheduler.get_stats().update_count, 1);
    }
}
