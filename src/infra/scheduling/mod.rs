//! OS scheduling port.
//!
//! Policy, niceness and affinity changes go through [`SchedulingPort`] so the
//! supervisor can run against the real kernel on Linux or against
//! [`SimulatedScheduler`] everywhere else. Every refusal comes back as a
//! [`SchedulingError`]; the port never panics on an unprivileged host.

#[cfg(target_os = "linux")]
pub mod native;
pub mod simulated;

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulingError;
use crate::core::priority::{OsSchedule, PriorityLevel};

#[cfg(target_os = "linux")]
pub use native::LinuxScheduler;
pub use simulated::{AppliedSchedule, SimulatedScheduler};

/// Point-in-time resource counters for one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    /// Total CPU time consumed (user + system).
    pub cpu_time_ms: u64,
    /// Resident set size.
    pub rss_bytes: u64,
}

/// CPUs visible to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTopology {
    /// Number of online CPUs, indexed `0..count`.
    pub count: usize,
    /// CPUs isolated from the general scheduler.
    pub isolated: Vec<usize>,
}

impl CpuTopology {
    /// Topology with `count` CPUs and none isolated.
    #[must_use]
    pub const fn uniform(count: usize) -> Self {
        Self {
            count,
            isolated: Vec::new(),
        }
    }

    /// Set the isolated CPUs, dropping indices outside the topology.
    #[must_use]
    pub fn with_isolated(mut self, isolated: impl IntoIterator<Item = usize>) -> Self {
        let mut cpus: Vec<usize> = isolated.into_iter().filter(|c| *c < self.count).collect();
        cpus.sort_unstable();
        cpus.dedup();
        self.isolated = cpus;
        self
    }

    /// All CPU indices.
    #[must_use]
    pub fn all(&self) -> Vec<usize> {
        (0..self.count).collect()
    }

    /// CPUs that are not isolated.
    #[must_use]
    pub fn shared(&self) -> Vec<usize> {
        (0..self.count)
            .filter(|c| !self.isolated.contains(c))
            .collect()
    }

    /// Affinity for a process that did not ask for one.
    ///
    /// Critical and Emergency get the isolated cores, everything else the
    /// shared cores. An empty preferred set falls back to every CPU.
    #[must_use]
    pub fn default_affinity(&self, level: PriorityLevel) -> Vec<usize> {
        let preferred = if level.is_latency_critical() {
            self.isolated.clone()
        } else {
            self.shared()
        };
        if preferred.is_empty() {
            self.all()
        } else {
            preferred
        }
    }
}

/// Kernel-facing scheduling operations.
pub trait SchedulingPort: Send + Sync {
    /// CPUs available for pinning.
    fn topology(&self) -> CpuTopology;

    /// Apply a policy and its value. Normal schedules set niceness.
    fn set_policy(&self, pid: u32, schedule: OsSchedule) -> Result<(), SchedulingError>;

    /// Apply a niceness under the normal policy.
    fn set_niceness(&self, pid: u32, value: i32) -> Result<(), SchedulingError>;

    /// Pin the process to `cpus`.
    fn set_affinity(&self, pid: u32, cpus: &[usize]) -> Result<(), SchedulingError>;

    /// Read resource counters, `None` when the process is gone or unreadable.
    fn sample_usage(&self, pid: u32) -> Option<UsageSample>;
}

/// Parse a kernel CPU list such as `0-2,5,7-8`.
///
/// Malformed items are skipped.
#[must_use]
pub fn parse_cpu_list(raw: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for item in raw.trim().split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                    if lo <= hi {
                        cpus.extend(lo..=hi);
                    }
                }
            }
            None => {
                if let Ok(cpu) = item.parse::<usize>() {
                    cpus.push(cpu);
                }
            }
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    cpus
}
