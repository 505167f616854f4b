//! Health snapshots

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{BridgeConfig, RunMode};
use crate::cycle::{CycleReport, PollCycleOrchestrator};
use crate::device::{DeviceLink, DeviceStatus};
use crate::gateway::{GatewayClient, GatewayStatus};
use crate::scheduler::{Scheduler, SchedulerStats};

/// Overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Gateway connected and the last cycle was clean
    Healthy,
    /// Running, but something needs a reconnect
    Degraded,
    /// Shutting down
    Stopping,
}

/// Static part of the configuration shown in reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationInfo {
    pub workstation_id: String,
    pub mode: RunMode,
    pub serial_port: String,
    pub baud_rate: u32,
}

impl From<&BridgeConfig> for ConfigurationInfo {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            workstation_id: config.workstation_id.clone(),
            mode: config.mode,
            serial_port: config.device.port_name.clone(),
            baud_rate: config.device.baud_rate,
        }
    }
}

/// Snapshot of every component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub scale: DeviceStatus,
    pub gateway: GatewayStatus,
    pub scheduler: SchedulerStats,
    pub last_cycle: Option<CycleReport>,
    pub configuration: ConfigurationInfo,
}

impl HealthReport {
    /// Collect the current state of a running bridge
    pub fn collect(
        config: &BridgeConfig,
        device: &DeviceLink,
        gateway: &GatewayClient,
        orchestrator: &PollCycleOrchestrator,
        scheduler: &Scheduler,
        started_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        let stats = scheduler.stats();
        let last_cycle = orchestrator.last_report();

        let status = if stats.shutting_down {
            HealthStatus::Stopping
        } else if gateway.is_connected() && last_cycle.as_ref().map_or(true, |r| r.is_clean()) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            version: crate::VERSION,
            timestamp: now,
            uptime_secs: (now - started_at).num_seconds(),
            scale: device.status(),
            gateway: gateway.status(),
            scheduler: stats,
            last_cycle,
            configuration: ConfigurationInfo::from(config),
        }
    }
}
