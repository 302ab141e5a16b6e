//! Per-domain snapshot cache in front of the probes.
//!
//! Each domain keeps its latest `Arc<Snapshot>`; readers clone the `Arc` and
//! never see a partially written value. Probes run on the blocking pool under
//! a timeout, and failures degrade to the previous snapshot.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::metrics::{
    CpuMetrics, DiskMetrics, Domain, GpuReading, MemoryMetrics, NetworkMetrics, ProcessRecord,
    Snapshot,
};
use super::probe::{GpuProbe, SystemProbe};
use super::summary::{log_gpu_status, log_system_status};
use crate::core::config::MonitorConfig;
use crate::error::{MonitorError, Result};

type SharedGpuProbe = Arc<Mutex<Box<dyn GpuProbe>>>;
type SharedSystemProbe = Arc<Mutex<Box<dyn SystemProbe>>>;

struct Entry<T> {
    snapshot: Arc<Snapshot<T>>,
    refreshed_at: Instant,
}

/// Storage for one domain
struct Slot<T> {
    current: RwLock<Option<Entry<T>>>,
    /// Serializes refreshes so concurrent callers do not probe twice
    refresh: tokio::sync::Mutex<()>,
    /// Set once the probe reports it can never serve this domain
    disabled: AtomicBool,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            current: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            disabled: AtomicBool::new(false),
        }
    }

    fn fresh(&self, max_age: Duration) -> Option<Arc<Snapshot<T>>> {
        let current = self.current.read();
        current
            .as_ref()
            .filter(|entry| entry.refreshed_at.elapsed() < max_age)
            .map(|entry| entry.snapshot.clone())
    }

    fn latest(&self) -> Option<Arc<Snapshot<T>>> {
        self.current.read().as_ref().map(|entry| entry.snapshot.clone())
    }

    fn store(&self, snapshot: Arc<Snapshot<T>>) {
        *self.current.write() = Some(Entry {
            snapshot,
            refreshed_at: Instant::now(),
        });
    }
}

/// A snapshot of any domain, as returned by [`MetricsCache::get`]
#[derive(Debug, Clone)]
pub enum DomainSnapshot {
    Gpu(Arc<Snapshot<GpuReading>>),
    Cpu(Arc<Snapshot<CpuMetrics>>),
    Memory(Arc<Snapshot<MemoryMetrics>>),
    Disk(Arc<Snapshot<Vec<DiskMetrics>>>),
    Network(Arc<Snapshot<NetworkMetrics>>),
    Processes(Arc<Snapshot<Vec<ProcessRecord>>>),
}

/// Everything one scheduler cycle looks at
#[derive(Debug, Clone)]
pub struct MetricsFrame {
    pub gpu: Arc<Snapshot<GpuReading>>,
    pub cpu: Arc<Snapshot<CpuMetrics>>,
    pub memory: Arc<Snapshot<MemoryMetrics>>,
    pub processes: Arc<Snapshot<Vec<ProcessRecord>>>,
    /// Only present on background-tier cycles
    pub disks: Option<Arc<Snapshot<Vec<DiskMetrics>>>>,
    pub network: Option<Arc<Snapshot<NetworkMetrics>>>,
}

impl MetricsFrame {
    /// Frame where every domain is unavailable
    pub fn empty() -> Self {
        Self {
            gpu: Arc::new(Snapshot::unavailable()),
            cpu: Arc::new(Snapshot::unavailable()),
            memory: Arc::new(Snapshot::unavailable()),
            processes: Arc::new(Snapshot::unavailable()),
            disks: None,
            network: None,
        }
    }

}

/// Latest snapshot per domain with a staleness window
pub struct MetricsCache {
    gpu_probe: Option<SharedGpuProbe>,
    gpu_probe_name: &'static str,
    system_probe: SharedSystemProbe,
    platform: String,
    update_interval: Duration,
    probe_timeout: Duration,
    top_processes: usize,
    gpu: Slot<GpuReading>,
    cpu: Slot<CpuMetrics>,
    memory: Slot<MemoryMetrics>,
    disk: Slot<Vec<DiskMetrics>>,
    network: Slot<NetworkMetrics>,
    processes: Slot<Vec<ProcessRecord>>,
    probe_calls: AtomicU64,
    probe_errors: AtomicU64,
}

impl MetricsCache {
    pub fn new(
        config: &MonitorConfig,
        gpu_probe: Option<Box<dyn GpuProbe>>,
        system_probe: Box<dyn SystemProbe>,
    ) -> Self {
        let gpu_probe_name = gpu_probe.as_ref().map(|p| p.name()).unwrap_or("none");
        let platform = system_probe.platform();

        Self {
            gpu_probe: gpu_probe.map(|p| Arc::new(Mutex::new(p))),
            gpu_probe_name,
            system_probe: Arc::new(Mutex::new(system_probe)),
            platform,
            update_interval: config.update_interval(),
            probe_timeout: config.probe_timeout(),
            top_processes: config.top_processes,
            gpu: Slot::new(),
            cpu: Slot::new(),
            memory: Slot::new(),
            disk: Slot::new(),
            network: Slot::new(),
            processes: Slot::new(),
            probe_calls: AtomicU64::new(0),
            probe_errors: AtomicU64::new(0),
        }
    }

    /// Total probe invocations so far
    pub fn probe_count(&self) -> u64 {
        self.probe_calls.load(Ordering::Relaxed)
    }

    /// Probe invocations that failed or timed out
    pub fn probe_error_count(&self) -> u64 {
        self.probe_errors.load(Ordering::Relaxed)
    }

    pub fn gpu_probe_name(&self) -> &'static str {
        self.gpu_probe_name
    }

    /// Operating system reported by the system probe
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Fresh-or-cached snapshot of any domain
    pub async fn get(&self, domain: Domain, force_refresh: bool) -> DomainSnapshot {
        match domain {
            Domain::Gpu => DomainSnapshot::Gpu(self.gpu(force_refresh).await),
            Domain::Cpu => DomainSnapshot::Cpu(self.cpu(force_refresh).await),
            Domain::Memory => DomainSnapshot::Memory(self.memory(force_refresh).await),
            Domain::Disk => DomainSnapshot::Disk(self.disks(force_refresh).await),
            Domain::Network => DomainSnapshot::Network(self.network(force_refresh).await),
            Domain::Processes => DomainSnapshot::Processes(self.processes(force_refresh).await),
        }
    }

    /// Collect the domains a scheduler cycle needs
    pub async fn frame(&self, force_refresh: bool, include_background: bool) -> MetricsFrame {
        let previous_gpu = self.gpu.latest();
        let previous_processes = self.processes.latest();
        let (gpu, cpu, memory, processes) = tokio::join!(
            self.gpu(force_refresh),
            self.cpu(force_refresh),
            self.memory(force_refresh),
            self.processes(force_refresh),
        );

        let (disks, network) = if include_background {
            let (disks, network) = tokio::join!(self.disks(force_refresh), self.network(force_refresh));
            (Some(disks), Some(network))
        } else {
            (None, None)
        };

        if gpu.available && is_new(&previous_gpu, &gpu) {
            log_gpu_status(&gpu.data);
        }
        if processes.available && is_new(&previous_processes, &processes) {
            log_system_status(&cpu.data, &memory.data, &processes.data);
        }

        MetricsFrame {
            gpu,
            cpu,
            memory,
            processes,
            disks,
            network,
        }
    }

    pub async fn gpu(&self, force_refresh: bool) -> Arc<Snapshot<GpuReading>> {
        let Some(probe) = self.gpu_probe.clone() else {
            // No GPU probe is permanent; keep handing out the same snapshot
            if let Some(snapshot) = self.gpu.latest() {
                return snapshot;
            }
            let snapshot = Arc::new(Snapshot::unavailable());
            self.gpu.store(snapshot.clone());
            return snapshot;
        };

        let timeout = self.probe_timeout;
        let probe_name = self.gpu_probe_name;
        self.refresh(Domain::Gpu, &self.gpu, force_refresh, move || {
            let mut guard = lock_probe(&probe, timeout, Domain::Gpu)?;
            if !guard.is_available() {
                return Err(MonitorError::probe_unavailable(format!(
                    "{} GPU probe lost access to its devices",
                    probe_name
                )));
            }
            let devices = guard.sample(None)?;
            // Probes that shell out cache this from the sample above
            let driver_version = guard.driver_version();
            Ok(GpuReading {
                probe: probe_name.to_string(),
                driver_version,
                devices,
            })
        })
        .await
    }

    pub async fn cpu(&self, force_refresh: bool) -> Arc<Snapshot<CpuMetrics>> {
        let probe = self.system_probe.clone();
        let timeout = self.probe_timeout;
        self.refresh(Domain::Cpu, &self.cpu, force_refresh, move || {
            lock_probe(&probe, timeout, Domain::Cpu)?.sample_cpu()
        })
        .await
    }

    pub async fn memory(&self, force_refresh: bool) -> Arc<Snapshot<MemoryMetrics>> {
        let probe = self.system_probe.clone();
        let timeout = self.probe_timeout;
        self.refresh(Domain::Memory, &self.memory, force_refresh, move || {
            lock_probe(&probe, timeout, Domain::Memory)?.sample_memory()
        })
        .await
    }

    pub async fn disks(&self, force_refresh: bool) -> Arc<Snapshot<Vec<DiskMetrics>>> {
        let probe = self.system_probe.clone();
        let timeout = self.probe_timeout;
        self.refresh(Domain::Disk, &self.disk, force_refresh, move || {
            lock_probe(&probe, timeout, Domain::Disk)?.sample_disks()
        })
        .await
    }

    pub async fn network(&self, force_refresh: bool) -> Arc<Snapshot<NetworkMetrics>> {
        let probe = self.system_probe.clone();
        let timeout = self.probe_timeout;
        self.refresh(Domain::Network, &self.network, force_refresh, move || {
            lock_probe(&probe, timeout, Domain::Network)?.sample_network()
        })
        .await
    }

    pub async fn processes(&self, force_refresh: bool) -> Arc<Snapshot<Vec<ProcessRecord>>> {
        let probe = self.system_probe.clone();
        let timeout = self.probe_timeout;
        let limit = self.top_processes;
        self.refresh(Domain::Processes, &self.processes, force_refresh, move || {
            lock_probe(&probe, timeout, Domain::Processes)?.sample_processes(limit)
        })
        .await
    }

    async fn refresh<T, F>(
        &self,
        domain: Domain,
        slot: &Slot<T>,
        force_refresh: bool,
        sampler: F,
    ) -> Arc<Snapshot<T>>
    where
        T: Default + Send + Sync + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if slot.disabled.load(Ordering::Relaxed) {
            return slot.latest().unwrap_or_else(|| Arc::new(Snapshot::unavailable()));
        }
        if !force_refresh {
            if let Some(snapshot) = slot.fresh(self.update_interval) {
                return snapshot;
            }
        }

        let _refreshing = slot.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if !force_refresh {
            if let Some(snapshot) = slot.fresh(self.update_interval) {
                return snapshot;
            }
        }

        match self.run_probe(domain, sampler).await {
            Ok(data) => {
                let snapshot = Arc::new(Snapshot::new(data));
                slot.store(snapshot.clone());
                log::trace!("{} snapshot refreshed", domain);
                snapshot
            }
            Err(e) if e.is_permanent() => {
                self.probe_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("{} monitoring unavailable for this session: {}", domain, e);
                slot.disabled.store(true, Ordering::Relaxed);
                let snapshot = Arc::new(Snapshot::unavailable());
                slot.store(snapshot.clone());
                snapshot
            }
            Err(e) => {
                self.probe_errors.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to update {} metrics: {}", domain, e);
                slot.latest()
                    .unwrap_or_else(|| Arc::new(Snapshot::unavailable()))
            }
        }
    }

    async fn run_probe<T, F>(&self, domain: Domain, sampler: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.probe_calls.fetch_add(1, Ordering::Relaxed);

        let task = tokio::task::spawn_blocking(sampler);
        match tokio::time::timeout(self.probe_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(MonitorError::probe_transient(format!(
                "{} probe task failed: {}",
                domain, join_error
            ))),
            Err(_) => Err(MonitorError::ProbeTimeout(
                self.probe_timeout.as_millis() as u64
            )),
        }
    }
}

fn is_new<T>(previous: &Option<Arc<T>>, current: &Arc<T>) -> bool {
    previous
        .as_ref()
        .map_or(true, |previous| !Arc::ptr_eq(previous, current))
}

/// Lock a probe, giving up after `timeout` if a previous call is still stuck
fn lock_probe<P: ?Sized>(
    probe: &Arc<Mutex<Box<P>>>,
    timeout: Duration,
    domain: Domain,
) -> Result<parking_lot::MutexGuard<'_, Box<P>>> {
    probe
        .try_lock_for(timeout)
        .ok_or_else(|| MonitorError::probe_transient(format!("{} probe is busy", domain)))
}
