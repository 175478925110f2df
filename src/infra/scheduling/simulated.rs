//! Scheduling port that mimics kernel permission rules in memory.
//!
//! Unprivileged mode refuses real-time policies and negative niceness, the
//! same way an unprivileged Linux user is refused with `EPERM`.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{CpuTopology, SchedulingPort, UsageSample};
use crate::core::error::SchedulingError;
use crate::core::priority::OsSchedule;

const EPERM: &str = "Operation not permitted (os error 1)";

/// What the simulated kernel accepted for one pid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedSchedule {
    /// Last accepted policy.
    pub schedule: Option<OsSchedule>,
    /// Last accepted niceness.
    pub niceness: Option<i32>,
    /// Last accepted CPU set.
    pub affinity: Option<Vec<usize>>,
}

#[derive(Debug, Default)]
struct SimSchedState {
    privileged: bool,
    refuse_all: bool,
    refuse_affinity: bool,
    applied: HashMap<u32, AppliedSchedule>,
    usage: HashMap<u32, UsageSample>,
}

/// In-memory scheduling port.
#[derive(Debug)]
pub struct SimulatedScheduler {
    topology: CpuTopology,
    state: Mutex<SimSchedState>,
}

impl SimulatedScheduler {
    /// Scheduler that accepts everything.
    #[must_use]
    pub fn privileged(topology: CpuTopology) -> Self {
        Self::with_privilege(topology, true)
    }

    /// Scheduler that refuses real-time policies and negative niceness.
    #[must_use]
    pub fn unprivileged(topology: CpuTopology) -> Self {
        Self::with_privilege(topology, false)
    }

    fn with_privilege(topology: CpuTopology, privileged: bool) -> Self {
        Self {
            topology,
            state: Mutex::new(SimSchedState {
                privileged,
                ..SimSchedState::default()
            }),
        }
    }

    /// Refuse every policy and niceness change, including niceness 0.
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    /// Refuse affinity changes.
    pub fn refuse_affinity(&self, refuse: bool) {
        self.state.lock().refuse_affinity = refuse;
    }

    /// Report `sample` for `pid` on the next usage read.
    pub fn set_usage(&self, pid: u32, sample: UsageSample) {
        self.state.lock().usage.insert(pid, sample);
    }

    /// What was accepted for `pid`.
    #[must_use]
    pub fn applied(&self, pid: u32) -> Option<AppliedSchedule> {
        self.state.lock().applied.get(&pid).cloned()
    }
}

impl SchedulingPort for SimulatedScheduler {
    fn topology(&self) -> CpuTopology {
        self.topology.clone()
    }

    fn set_policy(&self, pid: u32, schedule: OsSchedule) -> Result<(), SchedulingError> {
        let mut state = self.state.lock();
        let allowed = !state.refuse_all
            && (state.privileged || (!schedule.policy.is_realtime() && schedule.value >= 0));
        if !allowed {
            return Err(SchedulingError::PolicyRejected {
                policy: schedule.to_string(),
                reason: EPERM.into(),
            });
        }
        let entry = state.applied.entry(pid).or_default();
        entry.schedule = Some(schedule);
        if !schedule.policy.is_realtime() {
            entry.niceness = Some(schedule.value);
        }
        Ok(())
    }

    fn set_niceness(&self, pid: u32, value: i32) -> Result<(), SchedulingError> {
        let mut state = self.state.lock();
        if state.refuse_all || (!state.privileged && value < 0) {
            return Err(SchedulingError::NicenessRejected {
                value,
                reason: EPERM.into(),
            });
        }
        state.applied.entry(pid).or_default().niceness = Some(value);
        Ok(())
    }

    fn set_affinity(&self, pid: u32, cpus: &[usize]) -> Result<(), SchedulingError> {
        let mut state = self.state.lock();
        if state.refuse_affinity || cpus.iter().any(|c| *c >= self.topology.count) {
            return Err(SchedulingError::AffinityRejected {
                cpus: cpus.to_vec(),
                reason: "Invalid argument (os error 22)".into(),
            });
        }
        state.applied.entry(pid).or_default().affinity = Some(cpus.to_vec());
        Ok(())
    }

    fn sample_usage(&self, pid: u32) -> Option<UsageSample> {
        self.state.lock().usage.get(&pid).copied()
    }
}
