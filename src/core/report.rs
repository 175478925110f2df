//! Telemetry aggregation.
//!
//! [`TelemetryAggregator::snapshot`] takes the supervisor registry lock and
//! then the arbiter state lock, and builds the whole report while holding
//! both. A report therefore never shows a half-applied state transition or
//! a transaction that is counted but still queued.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::TelemetryThresholds;
use crate::core::arbiter::{BusArbiter, BusStats, DeviceStats, TransactionId};
use crate::core::process::ProcessStatus;
use crate::core::supervisor::ProcessSupervisor;
use crate::util::clock::now_ms;

/// What a recommendation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    /// A process exhausted its restarts.
    ProcessNeedsAttention,
    /// A process runs with less scheduling than it asked for.
    DegradedScheduling,
    /// A process is above its memory ceiling.
    ProcessOverMemory,
    /// A process is above its CPU ceiling.
    ProcessOverCpu,
    /// A latency-critical device is slower than the servo target.
    ServoLatencyHigh,
    /// A bus is busier than the utilization target.
    BusUtilizationHigh,
    /// A device fails more often than the error-rate target.
    DeviceErrorRateHigh,
}

/// One actionable finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Category.
    pub kind: RecommendationKind,
    /// Process name, device name or `bus-N`.
    pub subject: String,
    /// Operator-facing text.
    pub message: String,
}

/// The transaction on the bus when the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightTransaction {
    /// Transaction id.
    pub id: TransactionId,
    /// Target device.
    pub device: String,
}

/// Consistent view of the whole scheduling core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReport {
    /// Wall-clock time of the snapshot.
    pub generated_at_ms: u128,
    /// Every managed process, sorted by name.
    pub processes: Vec<ProcessStatus>,
    /// Every registered device, sorted by name.
    pub devices: Vec<DeviceStats>,
    /// Every bus, sorted by id.
    pub buses: Vec<BusStats>,
    /// Transactions waiting in the arbiter queue.
    pub queue_depth: usize,
    /// Transaction executing at snapshot time.
    pub in_flight: Option<InFlightTransaction>,
    /// Findings against the configured thresholds.
    pub recommendations: Vec<Recommendation>,
}

impl SystemReport {
    /// Names of processes that need an operator.
    #[must_use]
    pub fn needs_attention(&self) -> Vec<&str> {
        self.processes
            .iter()
            .filter(|p| p.needs_attention())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// One process by name.
    #[must_use]
    pub fn process(&self, name: &str) -> Option<&ProcessStatus> {
        self.processes.iter().find(|p| p.name == name)
    }

    /// One device by name.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<&DeviceStats> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// One bus by id.
    #[must_use]
    pub fn bus(&self, id: u8) -> Option<&BusStats> {
        self.buses.iter().find(|b| b.id == id)
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builds [`SystemReport`]s from a supervisor and an arbiter.
pub struct TelemetryAggregator {
    supervisor: Arc<ProcessSupervisor>,
    arbiter: Arc<BusArbiter>,
    thresholds: TelemetryThresholds,
}

impl TelemetryAggregator {
    /// Aggregate over `supervisor` and `arbiter`.
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        arbiter: Arc<BusArbiter>,
        thresholds: TelemetryThresholds,
    ) -> Self {
        Self {
            supervisor,
            arbiter,
            thresholds,
        }
    }

    /// Thresholds recommendations are judged against.
    #[must_use]
    pub const fn thresholds(&self) -> &TelemetryThresholds {
        &self.thresholds
    }

    /// Take a consistent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SystemReport {
        let registry = self.supervisor.lock_registry();
        let state = self.arbiter.lock_state();
        let now = Instant::now();

        let processes = registry.statuses(now);
        let devices = state.device_stats();
        let buses = state.bus_stats();
        let queue_depth = state.queue_depth();
        let in_flight = state.in_flight().map(|(id, device)| InFlightTransaction {
            id,
            device: device.to_string(),
        });
        drop(state);
        drop(registry);

        let recommendations = recommend(&processes, &devices, &buses, &self.thresholds);
        SystemReport {
            generated_at_ms: now_ms(),
            processes,
            devices,
            buses,
            queue_depth,
            in_flight,
            recommendations,
        }
    }
}

/// Judge a snapshot against thresholds.
#[must_use]
pub fn recommend(
    processes: &[ProcessStatus],
    devices: &[DeviceStats],
    buses: &[BusStats],
    thresholds: &TelemetryThresholds,
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let mut push = |kind, subject: &str, message: String| {
        out.push(Recommendation {
            kind,
            subject: subject.to_string(),
            message,
        });
    };

    for p in processes {
        if p.needs_attention() {
            push(
                RecommendationKind::ProcessNeedsAttention,
                &p.name,
                format!(
                    "process exhausted {} restart(s); investigate and start it manually",
                    p.restart_count
                ),
            );
        }
        if p.is_degraded() {
            let applied = p
                .applied
                .map_or_else(|| "nothing".to_string(), |s| s.to_string());
            push(
                RecommendationKind::DegradedScheduling,
                &p.name,
                format!(
                    "requested {} but running with {applied}; grant CAP_SYS_NICE or adjust limits",
                    p.requested
                ),
            );
        }
        if p.over_memory_limit {
            let rss_mb = p.usage.map_or(0, |u| u.memory_bytes / (1024 * 1024));
            push(
                RecommendationKind::ProcessOverMemory,
                &p.name,
                format!("resident memory {rss_mb} MB is above its ceiling"),
            );
        }
        if p.over_cpu_limit {
            let cpu = p.usage.map_or(0.0, |u| u.cpu_percent);
            push(
                RecommendationKind::ProcessOverCpu,
                &p.name,
                format!("cpu use {cpu:.1}% is above its ceiling"),
            );
        }
    }

    for d in devices {
        if d.priority.is_latency_critical() {
            if let Some(latency) = d.avg_latency_ms {
                if latency > thresholds.servo_latency_target_ms {
                    push(
                        RecommendationKind::ServoLatencyHigh,
                        &d.name,
                        format!(
                            "average latency {latency:.2} ms exceeds servo target {:.2} ms; \
                             raise the bus clock or move low-priority traffic off bus {}",
                            thresholds.servo_latency_target_ms, d.bus
                        ),
                    );
                }
            }
        }
        if d.error_rate > thresholds.device_error_rate_target {
            push(
                RecommendationKind::DeviceErrorRateHigh,
                &d.name,
                format!(
                    "error rate {:.1}% exceeds target {:.1}%; check wiring and pull-ups",
                    d.error_rate * 100.0,
                    thresholds.device_error_rate_target * 100.0
                ),
            );
        }
    }

    for b in buses {
        if b.utilization > thresholds.bus_utilization_target {
            push(
                RecommendationKind::BusUtilizationHigh,
                &format!("bus-{}", b.id),
                format!(
                    "utilization {:.0}% exceeds target {:.0}%; split devices across buses",
                    b.utilization * 100.0,
                    thresholds.bus_utilization_target * 100.0
                ),
            );
        }
    }
    out
}
