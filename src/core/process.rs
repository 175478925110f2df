//! Managed process record and its public status view.

use std::fmt;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ProcessConfig;
use crate::core::error::SchedulingError;
use crate::core::priority::{OsSchedule, PriorityLevel};
use crate::infra::launcher::{ChildProcess, ExitInfo};
use crate::util::clock::system_time_ms;

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Not running and not scheduled to run.
    Stopped,
    /// Launch in progress.
    Starting,
    /// Alive.
    Running,
    /// Exited unexpectedly; a restart may be pending.
    Failed,
    /// Exited unexpectedly with no restarts left. Needs an operator.
    FailedExhausted,
}

impl ProcessState {
    /// Name used in audit events and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::FailedExhausted => "failed_exhausted",
        }
    }

    /// Starting or Running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// Process name.
    pub name: String,
    /// Unique per registration.
    pub registration: Uuid,
}

/// Latest resource sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU use over the last sampling period, 100.0 = one full core.
    pub cpu_percent: f64,
    /// Resident memory.
    pub memory_bytes: u64,
}

/// Point-in-time view of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    /// Process name.
    pub name: String,
    /// Lifecycle state.
    pub state: ProcessState,
    /// OS pid while a child exists.
    pub pid: Option<u32>,
    /// Abstract priority.
    pub priority: PriorityLevel,
    /// What the priority translates to.
    pub requested: OsSchedule,
    /// What the OS accepted on the last launch.
    pub applied: Option<OsSchedule>,
    /// CPUs the process is pinned to.
    pub affinity: Vec<usize>,
    /// Automatic restarts since the last manual start.
    pub restart_count: u32,
    /// Restart cap.
    pub max_restarts: u32,
    /// Whether automatic restart is enabled.
    pub restart_enabled: bool,
    /// Wall-clock time of the last launch.
    pub last_start_ms: Option<u128>,
    /// How the last child exited.
    pub last_exit: Option<ExitInfo>,
    /// Scheduling refusals from the last launch.
    pub degraded: Vec<SchedulingError>,
    /// Latest resource sample.
    pub usage: Option<ResourceUsage>,
    /// Resident memory above the configured ceiling.
    pub over_memory_limit: bool,
    /// CPU above the configured ceiling.
    pub over_cpu_limit: bool,
    /// Time until a pending automatic restart.
    pub restart_in_ms: Option<u64>,
}

impl ProcessStatus {
    /// Whether an operator has to intervene.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        self.state == ProcessState::FailedExhausted
    }

    /// Whether the process runs with less than it asked for.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

pub(crate) struct ManagedProcess {
    pub(crate) registration: Uuid,
    pub(crate) config: ProcessConfig,
    pub(crate) requested: OsSchedule,
    pub(crate) affinity: Vec<usize>,
    pub(crate) state: ProcessState,
    pub(crate) restart_count: u32,
    pub(crate) child: Option<Box<dyn ChildProcess>>,
    pub(crate) pid: Option<u32>,
    pub(crate) applied: Option<OsSchedule>,
    pub(crate) degraded: Vec<SchedulingError>,
    pub(crate) last_start: Option<SystemTime>,
    pub(crate) last_exit: Option<ExitInfo>,
    pub(crate) next_restart_at: Option<Instant>,
    pub(crate) stopping: bool,
    pub(crate) usage: Option<ResourceUsage>,
    pub(crate) last_cpu_sample: Option<(Instant, u64)>,
    pub(crate) over_memory: bool,
    pub(crate) over_cpu: bool,
}

impl ManagedProcess {
    pub(crate) fn new(config: ProcessConfig, affinity: Vec<usize>) -> Self {
        Self {
            registration: Uuid::new_v4(),
            requested: config.schedule(),
            config,
            affinity,
            state: ProcessState::Stopped,
            restart_count: 0,
            child: None,
            pid: None,
            applied: None,
            degraded: Vec::new(),
            last_start: None,
            last_exit: None,
            next_restart_at: None,
            stopping: false,
            usage: None,
            last_cpu_sample: None,
            over_memory: false,
            over_cpu: false,
        }
    }

    pub(crate) fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            name: self.config.name.clone(),
            registration: self.registration,
        }
    }

    /// Forget per-child bookkeeping after the child is gone.
    pub(crate) fn clear_child(&mut self) {
        self.child = None;
        self.pid = None;
        self.usage = None;
        self.last_cpu_sample = None;
        self.over_memory = false;
        self.over_cpu = false;
    }

    pub(crate) fn status(&self, now: Instant) -> ProcessStatus {
        ProcessStatus {
            name: self.config.name.clone(),
            state: self.state,
            pid: self.pid,
            priority: self.config.priority,
            requested: self.requested,
            applied: self.applied,
            affinity: self.affinity.clone(),
            restart_count: self.restart_count,
            max_restarts: self.config.restart.max_restarts,
            restart_enabled: self.config.restart.enabled,
            last_start_ms: self.last_start.map(system_time_ms),
            last_exit: self.last_exit,
            degraded: self.degraded.clone(),
            usage: self.usage,
            over_memory_limit: self.over_memory,
            over_cpu_limit: self.over_cpu,
            restart_in_ms: self.next_restart_at.map(|at| {
                u64::try_from(at.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX)
            }),
        }
    }
}
