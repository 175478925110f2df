//! Process supervisor.
//!
//! Owns the registry of managed processes, launches them with their OS
//! scheduling applied, and runs a monitor thread that detects exits,
//! schedules restarts with capped backoff and samples resource usage.
//!
//! All registry mutation happens under one lock. Only [`ProcessSupervisor::stop`]
//! waits on the OS, and it does so with the lock released.

mod monitor;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::{ProcessConfig, SupervisorConfig};
use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::error::{ConfigError, LaunchError, StartupError, SupervisorError};
use crate::core::priority::OsSchedule;
use crate::core::process::{ManagedProcess, ProcessHandle, ProcessState, ProcessStatus};
use crate::infra::launcher::{ChildProcess, ExitInfo, ProcessLauncher};
use crate::infra::scheduling::{CpuTopology, SchedulingPort};

const COMPONENT: &str = "supervisor";
const STOP_POLL: Duration = Duration::from_millis(10);
const REAP_ATTEMPTS: u32 = 50;

/// Registry of managed processes plus the audit sequence counter.
pub(crate) struct Registry {
    pub(crate) processes: BTreeMap<String, ManagedProcess>,
    audit_seq: u64,
}

impl Registry {
    pub(crate) fn statuses(&self, now: Instant) -> Vec<ProcessStatus> {
        self.processes.values().map(|p| p.status(now)).collect()
    }
}

pub(crate) struct SupervisorShared {
    config: SupervisorConfig,
    topology: CpuTopology,
    scheduler: Arc<dyn SchedulingPort>,
    launcher: Arc<dyn ProcessLauncher>,
    audit: Arc<dyn AuditSink>,
    registry: Mutex<Registry>,
    shut_down: AtomicBool,
}

/// Supervises a set of OS processes.
pub struct ProcessSupervisor {
    shared: Arc<SupervisorShared>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    /// Create a supervisor and start its monitor thread.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] when the configuration is invalid or the
    /// monitor thread cannot be spawned.
    pub fn new(
        config: SupervisorConfig,
        scheduler: Arc<dyn SchedulingPort>,
        launcher: Arc<dyn ProcessLauncher>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, StartupError> {
        config.validate().map_err(ConfigError::InvalidValue)?;
        let topology = scheduler.topology();
        info!(
            cpus = topology.count,
            isolated = ?topology.isolated,
            monitor_interval_ms = config.monitor_interval_ms,
            "starting process supervisor"
        );
        let shared = Arc::new(SupervisorShared {
            config,
            topology,
            scheduler,
            launcher,
            audit,
            registry: Mutex::new(Registry {
                processes: BTreeMap::new(),
                audit_seq: 0,
            }),
            shut_down: AtomicBool::new(false),
        });
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let monitor = monitor::spawn_monitor(Arc::clone(&shared), shutdown_rx).map_err(|e| {
            StartupError::WorkerSpawn {
                thread: monitor::THREAD_NAME,
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            shared,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Supervisor settings.
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    /// CPUs seen at construction.
    #[must_use]
    pub fn topology(&self) -> &CpuTopology {
        &self.shared.topology
    }

    /// Add a process in the Stopped state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed config or a duplicate name.
    pub fn register(&self, config: ProcessConfig) -> Result<ProcessHandle, ConfigError> {
        config.validate(self.shared.topology.count)?;
        let mut registry = self.shared.registry.lock();
        if registry.processes.contains_key(&config.name) {
            return Err(ConfigError::DuplicateProcess(config.name));
        }
        let affinity = config
            .cpu_affinity
            .clone()
            .unwrap_or_else(|| self.shared.topology.default_affinity(config.priority));
        let process = ManagedProcess::new(config, affinity);
        let handle = process.handle();
        info!(
            process = %handle.name,
            priority = %process.config.priority,
            schedule = %process.requested,
            affinity = ?process.affinity,
            "registered process"
        );
        let Registry {
            processes,
            audit_seq,
        } = &mut *registry;
        self.shared
            .record(audit_seq, &handle.name, "registered", None);
        processes.insert(handle.name.clone(), process);
        Ok(handle)
    }

    /// Launch a registered process.
    ///
    /// Starting a Failed or FailedExhausted process resets its restart
    /// budget. Starting an active process is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Launch`] when the process cannot be spawned,
    /// exits within the startup grace period, or no scheduling fallback is
    /// accepted. The process is left Stopped.
    pub fn start(&self, name: &str) -> Result<(), SupervisorError> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(SupervisorError::Shutdown);
        }
        {
            let mut registry = self.shared.registry.lock();
            let Registry {
                processes,
                audit_seq,
            } = &mut *registry;
            let process = processes
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))?;
            if process.stopping {
                return Err(SupervisorError::StopInProgress(name.to_string()));
            }
            if process.state.is_active() {
                debug!(process = name, state = %process.state, "start ignored, already active");
                return Ok(());
            }
            if matches!(
                process.state,
                ProcessState::Failed | ProcessState::FailedExhausted
            ) {
                process.restart_count = 0;
            }
            process.next_restart_at = None;
            self.shared
                .transition(audit_seq, process, ProcessState::Starting, None);
            if let Err(err) = self.shared.launch(process) {
                warn!(process = name, error = %err, "launch failed");
                self.shared.transition(
                    audit_seq,
                    process,
                    ProcessState::Stopped,
                    Some(err.to_string()),
                );
                return Err(err.into());
            }
        }

        let grace = self.shared.config.startup_grace();
        if !grace.is_zero() {
            thread::sleep(grace);
        }

        let mut registry = self.shared.registry.lock();
        let Registry {
            processes,
            audit_seq,
        } = &mut *registry;
        let process = processes
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))?;
        if process.stopping {
            debug!(process = name, "stop took the child during startup grace");
            return Err(SupervisorError::StopInProgress(name.to_string()));
        }
        if process.state != ProcessState::Starting {
            // A concurrent stop already finished.
            return Ok(());
        }
        let early_exit = match process.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(exit)) => exit,
            Some(Err(err)) => {
                warn!(process = name, error = %err, "exit check failed during startup");
                None
            }
            None => None,
        };
        if let Some(exit) = early_exit {
            process.clear_child();
            process.last_exit = Some(exit);
            self.shared.transition(
                audit_seq,
                process,
                ProcessState::Stopped,
                Some(exit.to_string()),
            );
            return Err(LaunchError::ExitedImmediately {
                name: name.to_string(),
                code: exit.code,
            }
            .into());
        }
        self.shared
            .transition(audit_seq, process, ProcessState::Running, None);
        info!(
            process = name,
            pid = ?process.pid,
            applied = ?process.applied,
            degraded = process.degraded.len(),
            "process running"
        );
        Ok(())
    }

    /// Stop a process: SIGTERM, wait up to `timeout`, then SIGKILL.
    ///
    /// Leaves the process Stopped with its restart budget reset and no
    /// restart pending. Stopping a process without a child only cancels any
    /// pending restart.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownProcess`] or
    /// [`SupervisorError::StopInProgress`].
    pub fn stop(&self, name: &str, timeout: Duration) -> Result<(), SupervisorError> {
        let child = {
            let mut registry = self.shared.registry.lock();
            let Registry {
                processes,
                audit_seq,
            } = &mut *registry;
            let process = processes
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))?;
            if process.stopping {
                return Err(SupervisorError::StopInProgress(name.to_string()));
            }
            process.next_restart_at = None;
            let Some(child) = process.child.take() else {
                process.clear_child();
                process.restart_count = 0;
                if process.state != ProcessState::Stopped {
                    self.shared
                        .transition(audit_seq, process, ProcessState::Stopped, None);
                }
                return Ok(());
            };
            process.stopping = true;
            child
        };

        info!(process = name, timeout_ms = timeout.as_millis(), "stopping process");
        let exit = terminate_child(name, child, timeout);

        let mut registry = self.shared.registry.lock();
        let Registry {
            processes,
            audit_seq,
        } = &mut *registry;
        if let Some(process) = processes.get_mut(name) {
            process.stopping = false;
            process.clear_child();
            process.restart_count = 0;
            if exit.is_some() {
                process.last_exit = exit;
            }
            self.shared.transition(
                audit_seq,
                process,
                ProcessState::Stopped,
                exit.map(|e| e.to_string()),
            );
        }
        Ok(())
    }

    /// Stop with the configured timeout, then start.
    ///
    /// # Errors
    ///
    /// Any error from [`stop`](Self::stop) or [`start`](Self::start).
    pub fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        self.stop(name, self.shared.config.stop_timeout())?;
        self.start(name)
    }

    /// Stop a process and remove it from the registry.
    ///
    /// # Errors
    ///
    /// Any error from [`stop`](Self::stop).
    pub fn deregister(&self, name: &str) -> Result<(), SupervisorError> {
        self.stop(name, self.shared.config.stop_timeout())?;
        let mut registry = self.shared.registry.lock();
        let Registry {
            processes,
            audit_seq,
        } = &mut *registry;
        if processes.remove(name).is_some() {
            self.shared.record(audit_seq, name, "deregistered", None);
            info!(process = name, "deregistered process");
        }
        Ok(())
    }

    /// Current state of one process.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<ProcessState> {
        self.shared
            .registry
            .lock()
            .processes
            .get(name)
            .map(|p| p.state)
    }

    /// Status of one process.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<ProcessStatus> {
        let now = Instant::now();
        self.shared
            .registry
            .lock()
            .processes
            .get(name)
            .map(|p| p.status(now))
    }

    /// Status of every process, sorted by name.
    #[must_use]
    pub fn statuses(&self) -> Vec<ProcessStatus> {
        self.shared.registry.lock().statuses(Instant::now())
    }

    /// Registry lock for consistent cross-component snapshots.
    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.shared.registry.lock()
    }

    /// Stop the monitor thread, then stop every process that has a child.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down process supervisor");
        self.shutdown_tx.lock().take();
        if let Some(handle) = self.monitor.lock().take() {
            if handle.join().is_err() {
                warn!("monitor thread panicked");
            }
        }

        let names: Vec<String> = {
            let mut registry = self.shared.registry.lock();
            registry
                .processes
                .values_mut()
                .filter_map(|p| {
                    p.next_restart_at = None;
                    p.child.is_some().then(|| p.config.name.clone())
                })
                .collect()
        };
        let timeout = self.shared.config.stop_timeout();
        for name in names {
            if let Err(err) = self.stop(&name, timeout) {
                warn!(process = %name, error = %err, "stop during shutdown failed");
            }
        }
        info!("process supervisor shut down");
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // Signal only; children are left alone unless shutdown() was called.
        if !self.shared.shut_down.swap(true, Ordering::AcqRel) {
            self.shutdown_tx.lock().take();
            debug!("ProcessSupervisor dropped without explicit shutdown");
        }
    }
}

impl SupervisorShared {
    fn record(&self, seq: &mut u64, subject: &str, action: &str, detail: Option<String>) {
        *seq += 1;
        self.audit
            .record(build_audit_event(*seq, COMPONENT, subject, action, detail));
    }

    fn transition(
        &self,
        seq: &mut u64,
        process: &mut ManagedProcess,
        to: ProcessState,
        detail: Option<String>,
    ) {
        let from = process.state;
        process.state = to;
        debug!(process = %process.config.name, %from, %to, "state transition");
        self.record(seq, &process.config.name, to.as_str(), detail);
    }

    /// Spawn a child and apply scheduling. Called with the registry locked.
    fn launch(&self, process: &mut ManagedProcess) -> Result<(), LaunchError> {
        let name = process.config.name.clone();
        let mut child = self
            .launcher
            .launch(&process.config.launch_spec())
            .map_err(|e| LaunchError::Spawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let pid = child.pid();
        process.degraded.clear();

        match self.apply_schedule(process, pid) {
            Ok(applied) => process.applied = Some(applied),
            Err(err) => {
                if let Err(kill_err) = child.kill() {
                    warn!(process = %name, pid, error = %kill_err, "kill after scheduling failure failed");
                }
                let _ = child.try_wait();
                return Err(err);
            }
        }

        if let Err(err) = self.scheduler.set_affinity(pid, &process.affinity) {
            warn!(process = %name, pid, error = %err, "affinity refused, running unpinned");
            process.degraded.push(err);
        }

        if let Ok(Some(exit)) = child.try_wait() {
            process.last_exit = Some(exit);
            return Err(LaunchError::ExitedImmediately {
                name,
                code: exit.code,
            });
        }

        process.clear_child();
        process.child = Some(child);
        process.pid = Some(pid);
        process.last_start = Some(SystemTime::now());
        Ok(())
    }

    /// Apply the requested schedule, falling back to niceness.
    ///
    /// Ladder: requested schedule, then the level's niceness (real-time
    /// requests only), then niceness 0.
    fn apply_schedule(
        &self,
        process: &mut ManagedProcess,
        pid: u32,
    ) -> Result<OsSchedule, LaunchError> {
        let requested = process.requested;
        let name = &process.config.name;
        let Err(first) = self.scheduler.set_policy(pid, requested) else {
            return Ok(requested);
        };
        warn!(process = %name, pid, requested = %requested, error = %first, "scheduling refused, degrading");
        process.degraded.push(first.clone());

        let mut ladder = Vec::with_capacity(2);
        if requested.policy.is_realtime() {
            ladder.push(process.config.priority.niceness());
        }
        if ladder.last() != Some(&0) {
            ladder.push(0);
        }

        let mut last = first;
        for value in ladder {
            match self.scheduler.set_niceness(pid, value) {
                Ok(()) => {
                    info!(process = %name, pid, niceness = value, "running with degraded scheduling");
                    return Ok(OsSchedule::nice(value));
                }
                Err(err) => {
                    warn!(process = %name, pid, niceness = value, error = %err, "niceness refused");
                    process.degraded.push(err.clone());
                    last = err;
                }
            }
        }
        Err(LaunchError::NoFallback {
            name: name.clone(),
            reason: last.to_string(),
        })
    }

    /// Decide between a delayed restart and exhaustion after a failure.
    fn on_failure(&self, seq: &mut u64, process: &mut ManagedProcess, now: Instant) {
        let max = process.config.restart.max_restarts;
        if process.config.restart.enabled && process.restart_count < max {
            let delay = self
                .config
                .restart_backoff
                .delay(process.restart_count + 1);
            process.next_restart_at = Some(now + delay);
            info!(
                process = %process.config.name,
                attempt = process.restart_count + 1,
                max_restarts = max,
                delay_ms = delay.as_millis(),
                "restart scheduled"
            );
            self.record(
                seq,
                &process.config.name,
                "restart_scheduled",
                Some(format!("delay_ms={}", delay.as_millis())),
            );
        } else {
            process.next_restart_at = None;
            warn!(
                process = %process.config.name,
                restart_count = process.restart_count,
                max_restarts = max,
                restart_enabled = process.config.restart.enabled,
                "restart budget exhausted, operator attention required"
            );
            self.transition(seq, process, ProcessState::FailedExhausted, None);
        }
    }
}

fn terminate_child(
    name: &str,
    mut child: Box<dyn ChildProcess>,
    timeout: Duration,
) -> Option<ExitInfo> {
    match child.try_wait() {
        Ok(Some(exit)) => return Some(exit),
        Ok(None) => {}
        Err(err) => warn!(process = name, error = %err, "exit check failed"),
    }
    if let Err(err) = child.terminate() {
        warn!(process = name, error = %err, "terminate failed");
    }

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(exit)) => return Some(exit),
            Ok(None) => {}
            Err(err) => {
                warn!(process = name, error = %err, "exit check failed");
                break;
            }
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }

    warn!(process = name, "did not exit in time, killing");
    if let Err(err) = child.kill() {
        warn!(process = name, error = %err, "kill failed");
    }
    for _ in 0..REAP_ATTEMPTS {
        if let Ok(Some(exit)) = child.try_wait() {
            return Some(exit);
        }
        thread::sleep(STOP_POLL);
    }
    warn!(process = name, "child not reaped after kill");
    None
}
