//! Linux scheduling via `sched_setscheduler(2)`, `setpriority(2)` and
//! `sched_setaffinity(2)`, with usage read from procfs.

#![allow(unsafe_code)]

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use super::{parse_cpu_list, CpuTopology, SchedulingPort, UsageSample};
use crate::core::error::SchedulingError;
use crate::core::priority::{OsSchedule, SchedPolicy};

const ISOLATED_CPUS: &str = "/sys/devices/system/cpu/isolated";

/// Scheduling port backed by the running kernel.
#[derive(Debug, Clone)]
pub struct LinuxScheduler {
    topology: CpuTopology,
    clock_ticks: u64,
    page_size: u64,
}

impl Default for LinuxScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxScheduler {
    /// Probe CPU count, isolated cores and clock constants.
    #[must_use]
    pub fn new() -> Self {
        let isolated = fs::read_to_string(Path::new(ISOLATED_CPUS))
            .map(|raw| parse_cpu_list(&raw))
            .unwrap_or_default();
        let topology = CpuTopology::uniform(num_cpus::get()).with_isolated(isolated);
        // SAFETY: sysconf only reads configuration values.
        let (ticks, page) = unsafe {
            (
                libc::sysconf(libc::_SC_CLK_TCK),
                libc::sysconf(libc::_SC_PAGESIZE),
            )
        };
        debug!(cpus = topology.count, isolated = ?topology.isolated, "probed cpu topology");
        Self {
            topology,
            clock_ticks: u64::try_from(ticks).ok().filter(|t| *t > 0).unwrap_or(100),
            page_size: u64::try_from(page).ok().filter(|p| *p > 0).unwrap_or(4096),
        }
    }
}

fn to_pid(pid: u32) -> Result<libc::pid_t, String> {
    libc::pid_t::try_from(pid).map_err(|_| format!("pid {pid} out of range"))
}

fn os_policy(policy: SchedPolicy) -> libc::c_int {
    match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::RoundRobin => libc::SCHED_RR,
        SchedPolicy::Normal => libc::SCHED_OTHER,
    }
}

impl SchedulingPort for LinuxScheduler {
    fn topology(&self) -> CpuTopology {
        self.topology.clone()
    }

    fn set_policy(&self, pid: u32, schedule: OsSchedule) -> Result<(), SchedulingError> {
        let rejected = |reason: String| SchedulingError::PolicyRejected {
            policy: schedule.to_string(),
            reason,
        };
        let os_pid = to_pid(pid).map_err(rejected)?;
        // SAFETY: sched_param is plain data; zeroed is a valid value on every libc target.
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        if schedule.policy.is_realtime() {
            param.sched_priority = schedule.value;
        }
        // SAFETY: param outlives the call and pid is a plain integer.
        let rc = unsafe { libc::sched_setscheduler(os_pid, os_policy(schedule.policy), &param) };
        if rc != 0 {
            return Err(rejected(io::Error::last_os_error().to_string()));
        }
        if schedule.policy.is_realtime() {
            Ok(())
        } else {
            self.set_niceness(pid, schedule.value)
        }
    }

    fn set_niceness(&self, pid: u32, value: i32) -> Result<(), SchedulingError> {
        // SAFETY: setpriority takes plain integers.
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid, value) };
        if rc == 0 {
            Ok(())
        } else {
            Err(SchedulingError::NicenessRejected {
                value,
                reason: io::Error::last_os_error().to_string(),
            })
        }
    }

    fn set_affinity(&self, pid: u32, cpus: &[usize]) -> Result<(), SchedulingError> {
        let rejected = |reason: String| SchedulingError::AffinityRejected {
            cpus: cpus.to_vec(),
            reason,
        };
        let os_pid = to_pid(pid).map_err(rejected)?;
        let limit = usize::try_from(libc::CPU_SETSIZE).unwrap_or(1024);
        // SAFETY: cpu_set_t is a plain bitmask; CPU_SET is bounded by CPU_SETSIZE above.
        let rc = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            for cpu in cpus.iter().copied().filter(|c| *c < limit) {
                libc::CPU_SET(cpu, &mut set);
            }
            libc::sched_setaffinity(os_pid, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(rejected(io::Error::last_os_error().to_string()))
        }
    }

    fn sample_usage(&self, pid: u32) -> Option<UsageSample> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let statm = fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
        let ticks = parse_stat_cpu_ticks(&stat)?;
        let pages = parse_statm_resident_pages(&statm)?;
        Some(UsageSample {
            cpu_time_ms: ticks.saturating_mul(1000) / self.clock_ticks,
            rss_bytes: pages.saturating_mul(self.page_size),
        })
    }
}

/// `utime + stime` from `/proc/<pid>/stat`, in clock ticks.
///
/// The command name may contain spaces and parentheses, so fields are counted
/// from the last `)`.
pub(crate) fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    // Field 3 (state) is the first after the name; utime is field 14.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

/// Resident pages from `/proc/<pid>/statm`.
pub(crate) fn parse_statm_resident_pages(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}
