//! Build a [`SchedulingCore`] from configuration and a set of ports.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{CoreConfig, Manifest};
use crate::core::{
    BusArbiter, ConfigError, DeviceHandle, InMemoryAuditSink, ProcessHandle, ProcessSupervisor,
    StartupError, TelemetryAggregator,
};
use crate::infra::bus::{BusEndpoint, BusSpec, DiscoveredBus};
use crate::infra::launcher::{ProcessLauncher, SimulatedLauncher};
use crate::infra::scheduling::{CpuTopology, SchedulingPort, SimulatedScheduler};
use crate::runtime::api::SchedulingCore;

/// OS-facing dependencies of the core.
#[derive(Clone)]
pub struct CorePorts {
    /// Scheduling syscalls.
    pub scheduler: Arc<dyn SchedulingPort>,
    /// Process launching.
    pub launcher: Arc<dyn ProcessLauncher>,
    /// Buses handed to the arbiter.
    pub buses: Vec<BusSpec>,
}

impl CorePorts {
    /// Real kernel scheduling and `std::process` launching.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn native(buses: Vec<BusSpec>) -> Self {
        Self {
            scheduler: Arc::new(crate::infra::scheduling::LinuxScheduler::new()),
            launcher: Arc::new(crate::infra::launcher::CommandLauncher),
            buses,
        }
    }

    /// In-memory ports with an unprivileged scheduler over `topology`.
    #[must_use]
    pub fn simulated(topology: CpuTopology, buses: Vec<BusSpec>) -> Self {
        Self {
            scheduler: Arc::new(SimulatedScheduler::unprivileged(topology)),
            launcher: Arc::new(SimulatedLauncher::new()),
            buses,
        }
    }

    /// Append a [`BusSpec`] for every accessible discovered adapter.
    ///
    /// `endpoint_for` opens the transport for one adapter; every bus gets the
    /// same clock ceiling. Adapters whose device node is missing or cannot be
    /// opened are skipped with a warning.
    #[must_use]
    pub fn with_discovered_buses(
        mut self,
        discovered: &[DiscoveredBus],
        max_frequency_hz: u32,
        mut endpoint_for: impl FnMut(&DiscoveredBus) -> Arc<dyn BusEndpoint>,
    ) -> Self {
        for bus in discovered {
            if !bus.accessible {
                warn!(bus = bus.id, adapter = ?bus.adapter_name, "skipping inaccessible i2c adapter");
                continue;
            }
            if self.buses.iter().any(|b| b.id == bus.id) {
                continue;
            }
            self.buses
                .push(BusSpec::new(bus.id, max_frequency_hz, endpoint_for(bus)));
        }
        self
    }
}

/// Validate `cfg` and start a supervisor and an arbiter sharing one audit log.
///
/// # Errors
///
/// Returns [`StartupError`] for invalid configuration or when a background
/// thread cannot be spawned.
pub fn build_core(cfg: &CoreConfig, ports: CorePorts) -> Result<SchedulingCore, StartupError> {
    cfg.validate().map_err(ConfigError::InvalidValue)?;
    let audit = Arc::new(InMemoryAuditSink::new(cfg.supervisor.audit_capacity));

    let supervisor = Arc::new(ProcessSupervisor::new(
        cfg.supervisor.clone(),
        ports.scheduler,
        ports.launcher,
        audit.clone(),
    )?);
    let arbiter = match BusArbiter::new(cfg.arbiter.clone(), ports.buses, audit.clone()) {
        Ok(arbiter) => Arc::new(arbiter),
        Err(err) => {
            supervisor.shutdown();
            return Err(err);
        }
    };
    let telemetry = TelemetryAggregator::new(
        Arc::clone(&supervisor),
        Arc::clone(&arbiter),
        cfg.telemetry.clone(),
    );
    info!("scheduling core ready");
    Ok(SchedulingCore::new(supervisor, arbiter, telemetry, audit))
}

/// Register every process and device in `manifest`.
///
/// Stops at the first rejected entry; entries registered before it stay
/// registered.
///
/// # Errors
///
/// The first [`ConfigError`].
pub fn register_manifest(
    core: &SchedulingCore,
    manifest: Manifest,
) -> Result<(Vec<ProcessHandle>, Vec<DeviceHandle>), ConfigError> {
    let processes = manifest
        .processes
        .into_iter()
        .map(|p| core.register_process(p))
        .collect::<Result<Vec<_>, _>>()?;
    let devices = manifest
        .devices
        .into_iter()
        .map(|d| core.register_device(d))
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        processes = processes.len(),
        devices = devices.len(),
        "manifest registered"
    );
    Ok((processes, devices))
}
