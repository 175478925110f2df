//! API-facing facade: one object owning the supervisor, the arbiter, the
//! telemetry aggregator and the shared audit log.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DeviceConfig, ProcessConfig};
use crate::core::{
    AuditEvent, BusArbiter, BusError, ConfigError, DeviceHandle, InMemoryAuditSink,
    ProcessHandle, ProcessState, ProcessSupervisor, SupervisorError, SystemReport,
    TelemetryAggregator, TransactionHandle, TransactionId,
};

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// No process needs an operator.
    pub ok: bool,
    /// Processes in FailedExhausted.
    pub needs_attention: Vec<String>,
    /// Processes running with degraded scheduling.
    pub degraded: Vec<String>,
}

/// The assembled scheduling core.
pub struct SchedulingCore {
    supervisor: Arc<ProcessSupervisor>,
    arbiter: Arc<BusArbiter>,
    telemetry: TelemetryAggregator,
    audit: Arc<InMemoryAuditSink>,
}

impl SchedulingCore {
    pub(crate) fn new(
        supervisor: Arc<ProcessSupervisor>,
        arbiter: Arc<BusArbiter>,
        telemetry: TelemetryAggregator,
        audit: Arc<InMemoryAuditSink>,
    ) -> Self {
        Self {
            supervisor,
            arbiter,
            telemetry,
            audit,
        }
    }

    /// The process supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// The bus arbiter.
    #[must_use]
    pub fn arbiter(&self) -> &Arc<BusArbiter> {
        &self.arbiter
    }

    /// Register a process.
    ///
    /// # Errors
    ///
    /// See [`ProcessSupervisor::register`].
    pub fn register_process(&self, config: ProcessConfig) -> Result<ProcessHandle, ConfigError> {
        self.supervisor.register(config)
    }

    /// Start a process.
    ///
    /// # Errors
    ///
    /// See [`ProcessSupervisor::start`].
    pub fn start(&self, name: &str) -> Result<(), SupervisorError> {
        self.supervisor.start(name)
    }

    /// Stop a process.
    ///
    /// # Errors
    ///
    /// See [`ProcessSupervisor::stop`].
    pub fn stop(&self, name: &str, timeout: Duration) -> Result<(), SupervisorError> {
        self.supervisor.stop(name, timeout)
    }

    /// Restart a process.
    ///
    /// # Errors
    ///
    /// See [`ProcessSupervisor::restart`].
    pub fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        self.supervisor.restart(name)
    }

    /// Stop and remove a process.
    ///
    /// # Errors
    ///
    /// See [`ProcessSupervisor::deregister`].
    pub fn deregister_process(&self, name: &str) -> Result<(), SupervisorError> {
        self.supervisor.deregister(name)
    }

    /// State of one process.
    #[must_use]
    pub fn process_state(&self, name: &str) -> Option<ProcessState> {
        self.supervisor.state(name)
    }

    /// Register a device.
    ///
    /// # Errors
    ///
    /// See [`BusArbiter::register_device`].
    pub fn register_device(&self, config: DeviceConfig) -> Result<DeviceHandle, ConfigError> {
        self.arbiter.register_device(config)
    }

    /// Remove a device.
    ///
    /// # Errors
    ///
    /// See [`BusArbiter::deregister_device`].
    pub fn deregister_device(&self, device: &DeviceHandle) -> Result<(), BusError> {
        self.arbiter.deregister_device(device)
    }

    /// Queue a bus transaction.
    ///
    /// # Errors
    ///
    /// See [`BusArbiter::submit`].
    pub fn submit(
        &self,
        device: &DeviceHandle,
        payload: Vec<u8>,
        read_len: usize,
        timeout: Option<Duration>,
    ) -> Result<TransactionHandle, BusError> {
        self.arbiter.submit(device, payload, read_len, timeout)
    }

    /// Queue a transaction and await its outcome.
    ///
    /// # Errors
    ///
    /// Submission errors and the transaction's own [`BusError`].
    pub async fn transact(
        &self,
        device: &DeviceHandle,
        payload: Vec<u8>,
        read_len: usize,
    ) -> Result<Vec<u8>, BusError> {
        self.arbiter.submit(device, payload, read_len, None)?.await
    }

    /// Cancel a queued transaction.
    pub fn cancel(&self, id: TransactionId) -> bool {
        self.arbiter.cancel(id)
    }

    /// Consistent report of the whole core.
    #[must_use]
    pub fn snapshot(&self) -> SystemReport {
        self.telemetry.snapshot()
    }

    /// Summarized health.
    #[must_use]
    pub fn health(&self) -> Health {
        let statuses = self.supervisor.statuses();
        let needs_attention: Vec<String> = statuses
            .iter()
            .filter(|s| s.needs_attention())
            .map(|s| s.name.clone())
            .collect();
        let degraded = statuses
            .iter()
            .filter(|s| s.state.is_active() && s.is_degraded())
            .map(|s| s.name.clone())
            .collect();
        Health {
            ok: needs_attention.is_empty(),
            needs_attention,
            degraded,
        }
    }

    /// Lifecycle and bus-error audit trail, oldest first.
    #[must_use]
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.events()
    }

    /// Shut down the arbiter, then the supervisor.
    pub fn shutdown(&self) {
        info!("shutting down scheduling core");
        self.arbiter.shutdown();
        self.supervisor.shutdown();
    }
}
