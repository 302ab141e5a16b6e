//! Alert system for monitoring critical conditions.
//!
//! Evaluates the latest frame against fixed thresholds and produces alerts.
//! Alerts are rebuilt from scratch on every evaluation; a condition that
//! persists raises a fresh alert each cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::cache::MetricsFrame;
use super::classifier::ProcessCategory;
use super::metrics::ProcessRecord;

pub const GPU_TEMP_CRITICAL: u32 = 85;
pub const GPU_TEMP_WARNING: u32 = 75;
pub const CPU_USAGE_CRITICAL: f32 = 90.0;
pub const MEMORY_USAGE_CRITICAL: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Temperature,
    Usage,
    Security,
}

/// Process an alert points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertProcess {
    pub pid: u32,
    pub name: String,
    pub category: ProcessCategory,
}

impl From<&ProcessRecord> for AlertProcess {
    fn from(record: &ProcessRecord) -> Self {
        Self {
            pid: record.pid,
            name: record.name.clone(),
            category: record.classification.category,
        }
    }
}

/// An individual alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub gpu_id: Option<u32>,
    pub process: Option<AlertProcess>,
}

impl AlertEvent {
    /// Categories that also go out on the legacy GPU alert topic
    pub fn is_gpu_legacy(&self) -> bool {
        matches!(
            self.category,
            AlertCategory::Temperature | AlertCategory::Security
        )
    }
}

/// Evaluate the frame and generate alerts
pub fn evaluate_alerts(frame: &MetricsFrame) -> Vec<AlertEvent> {
    let mut alerts = Vec::new();
    let mut flagged_pids = HashSet::new();

    // GPU alerts
    if frame.gpu.available {
        for gpu in &frame.gpu.data.devices {
            if let Some(temp) = gpu.temperature_c {
                if temp > GPU_TEMP_CRITICAL {
                    alerts.push(AlertEvent {
                        category: AlertCategory::Temperature,
                        severity: AlertSeverity::Critical,
                        message: format!("GPU {} critical temperature: {}°C", gpu.gpu_id, temp),
                        value: Some(temp as f64),
                        threshold: Some(GPU_TEMP_CRITICAL as f64),
                        gpu_id: Some(gpu.gpu_id),
                        process: None,
                    });
                } else if temp > GPU_TEMP_WARNING {
                    alerts.push(AlertEvent {
                        category: AlertCategory::Temperature,
                        severity: AlertSeverity::Warning,
                        message: format!("GPU {} high temperature: {}°C", gpu.gpu_id, temp),
                        value: Some(temp as f64),
                        threshold: Some(GPU_TEMP_WARNING as f64),
                        gpu_id: Some(gpu.gpu_id),
                        process: None,
                    });
                }
            }

            for process in &gpu.processes {
                if process.classification.is_suspected_miner && flagged_pids.insert(process.pid) {
                    alerts.push(miner_alert(process, Some(gpu.gpu_id)));
                }
            }
        }
    }

    // Miners that show up in the system-wide top list
    if frame.processes.available {
        for process in &frame.processes.data {
            if process.classification.is_suspected_miner && flagged_pids.insert(process.pid) {
                alerts.push(miner_alert(process, None));
            }
        }
    }

    // CPU alerts
    if frame.cpu.available && frame.cpu.data.usage_percent > CPU_USAGE_CRITICAL {
        let usage = frame.cpu.data.usage_percent;
        alerts.push(AlertEvent {
            category: AlertCategory::Usage,
            severity: AlertSeverity::Critical,
            message: format!("Critical CPU usage: {:.1}%", usage),
            value: Some(usage as f64),
            threshold: Some(CPU_USAGE_CRITICAL as f64),
            gpu_id: None,
            process: None,
        });
    }

    // Memory alerts
    if frame.memory.available && frame.memory.data.used_percent > MEMORY_USAGE_CRITICAL {
        let usage = frame.memory.data.used_percent;
        alerts.push(AlertEvent {
            category: AlertCategory::Usage,
            severity: AlertSeverity::Critical,
            message: format!("Critical memory usage: {:.1}%", usage),
            value: Some(usage as f64),
            threshold: Some(MEMORY_USAGE_CRITICAL as f64),
            gpu_id: None,
            process: None,
        });
    }

    alerts
}

fn miner_alert(process: &ProcessRecord, gpu_id: Option<u32>) -> AlertEvent {
    AlertEvent {
        category: AlertCategory::Security,
        severity: AlertSeverity::Critical,
        message: format!(
            "Suspected cryptocurrency miner detected: {} (PID {})",
            process.name, process.pid
        ),
        value: None,
        threshold: None,
        gpu_id,
        process: Some(AlertProcess::from(process)),
    }
}
