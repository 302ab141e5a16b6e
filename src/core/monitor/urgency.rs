//! Urgency tiers and emission gating.
//!
//! The tier derived from the latest frame decides how often metrics are
//! broadcast; each tier has a fixed period.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::cache::MetricsFrame;

pub const CPU_CRITICAL_USAGE: f32 = 90.0;
pub const CPU_CRITICAL_TEMP: f32 = 80.0;
pub const GPU_CRITICAL_TEMP: u32 = 80;
pub const GPU_IMPORTANT_UTILIZATION: f32 = 50.0;
pub const CPU_IMPORTANT_USAGE: f32 = 70.0;
pub const MEMORY_IMPORTANT_USAGE: f32 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyTier {
    Critical,
    Important,
    Standard,
    Background,
}

impl UrgencyTier {
    pub const ALL: [UrgencyTier; 4] = [
        UrgencyTier::Critical,
        UrgencyTier::Important,
        UrgencyTier::Standard,
        UrgencyTier::Background,
    ];

    /// Fixed emission period of the tier
    pub fn period(&self) -> Duration {
        match self {
            UrgencyTier::Critical => Duration::from_secs(1),
            UrgencyTier::Important => Duration::from_secs(2),
            UrgencyTier::Standard => Duration::from_secs(5),
            UrgencyTier::Background => Duration::from_secs(10),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyTier::Critical => "critical",
            UrgencyTier::Important => "important",
            UrgencyTier::Standard => "standard",
            UrgencyTier::Background => "background",
        }
    }
}

impl fmt::Display for UrgencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the urgency tier from the latest frame. First satisfied rule wins;
/// unavailable domains and missing sensors never trigger a rule.
pub fn evaluate_urgency(frame: &MetricsFrame) -> UrgencyTier {
    let cpu = frame.cpu.available.then_some(&frame.cpu.data);
    let memory = frame.memory.available.then_some(&frame.memory.data);
    let gpus = if frame.gpu.available {
        frame.gpu.data.devices.as_slice()
    } else {
        &[]
    };

    let cpu_critical = cpu.is_some_and(|cpu| {
        cpu.usage_percent > CPU_CRITICAL_USAGE
            || cpu
                .temperature_celsius
                .is_some_and(|t| t > CPU_CRITICAL_TEMP)
    });
    let gpu_critical = gpus.iter().any(|gpu| {
        gpu.temperature_c.is_some_and(|t| t > GPU_CRITICAL_TEMP) || gpu.has_suspected_miner()
    });

    if cpu_critical || gpu_critical {
        return UrgencyTier::Critical;
    }

    let gpu_important = gpus
        .iter()
        .any(|gpu| gpu.utilization_percent > GPU_IMPORTANT_UTILIZATION || !gpu.processes.is_empty());
    let cpu_important = cpu.is_some_and(|cpu| cpu.usage_percent > CPU_IMPORTANT_USAGE);
    let memory_important = memory.is_some_and(|m| m.used_percent > MEMORY_IMPORTANT_USAGE);

    if gpu_important || cpu_important || memory_important {
        return UrgencyTier::Important;
    }

    UrgencyTier::Standard
}

/// Last emission time per tier
#[derive(Debug, Default)]
pub struct TierClock {
    last_emit: HashMap<UrgencyTier, Instant>,
}

impl TierClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tier that never emitted is always due
    pub fn should_emit(&self, tier: UrgencyTier, now: Instant) -> bool {
        match self.last_emit.get(&tier) {
            Some(last) => now.saturating_duration_since(*last) >= tier.period(),
            None => true,
        }
    }

    pub fn mark_emitted(&mut self, tier: UrgencyTier, now: Instant) {
        self.last_emit.insert(tier, now);
    }
}
