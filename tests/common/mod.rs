//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use robosched::config::{ArbiterConfig, SupervisorConfig};
use robosched::core::{BackoffPolicy, BusArbiter, InMemoryAuditSink, ProcessSupervisor};
use robosched::infra::bus::{BusSpec, SimulatedBus};
use robosched::infra::launcher::SimulatedLauncher;
use robosched::infra::scheduling::{CpuTopology, SimulatedScheduler};

pub const BUS: u8 = 1;
pub const MAX_HZ: u32 = 1_000_000;
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Supervisor settings fast enough for tests.
pub fn fast_supervisor_config() -> SupervisorConfig {
    SupervisorConfig::new()
        .with_monitor_interval(Duration::from_millis(5))
        .with_sample_every_ticks(1)
        .with_startup_grace(Duration::ZERO)
        .with_stop_timeout(Duration::from_millis(100))
        .with_restart_backoff(BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(25),
        ))
}

pub struct SupervisorFixture {
    pub supervisor: Arc<ProcessSupervisor>,
    pub launcher: SimulatedLauncher,
    pub scheduler: Arc<SimulatedScheduler>,
    pub audit: Arc<InMemoryAuditSink>,
}

pub fn supervisor_with(config: SupervisorConfig, scheduler: SimulatedScheduler) -> SupervisorFixture {
    let launcher = SimulatedLauncher::new();
    let scheduler = Arc::new(scheduler);
    let audit = Arc::new(InMemoryAuditSink::new(4_096));
    let supervisor = ProcessSupervisor::new(
        config,
        scheduler.clone(),
        Arc::new(launcher.clone()),
        audit.clone(),
    )
    .unwrap();
    SupervisorFixture {
        supervisor: Arc::new(supervisor),
        launcher,
        scheduler,
        audit,
    }
}

pub fn privileged_supervisor() -> SupervisorFixture {
    supervisor_with(
        fast_supervisor_config(),
        SimulatedScheduler::privileged(CpuTopology::uniform(4).with_isolated([3])),
    )
}

pub fn fast_arbiter_config() -> ArbiterConfig {
    ArbiterConfig::new()
        .with_congestion_window(Duration::from_millis(50))
        .with_retry_backoff(BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
        ))
}

pub struct ArbiterFixture {
    pub arbiter: Arc<BusArbiter>,
    pub bus: Arc<SimulatedBus>,
    pub audit: Arc<InMemoryAuditSink>,
}

pub fn arbiter_with(config: ArbiterConfig) -> ArbiterFixture {
    let bus = Arc::new(SimulatedBus::new());
    let audit = Arc::new(InMemoryAuditSink::new(4_096));
    let arbiter = BusArbiter::new(
        config,
        vec![BusSpec::new(BUS, MAX_HZ, bus.clone())],
        audit.clone(),
    )
    .unwrap();
    ArbiterFixture {
        arbiter: Arc::new(arbiter),
        bus,
        audit,
    }
}

pub fn arbiter() -> ArbiterFixture {
    arbiter_with(fast_arbiter_config())
}
