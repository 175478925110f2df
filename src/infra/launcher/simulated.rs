//! In-process launcher used by tests and dry runs.
//!
//! Children are bookkeeping entries; nothing is spawned. Tests crash them with
//! [`SimulatedLauncher::crash`] and shape launch behavior per process name
//! with [`SimBehavior`].

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChildProcess, ExitInfo, LaunchSpec, ProcessLauncher};

const SIGKILL: i32 = 9;
const SIGTERM: i32 = 15;
const FIRST_PID: u32 = 40_000;

/// Per-name launch behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimBehavior {
    /// `launch` returns an error.
    pub fail_spawn: bool,
    /// The child is already dead with this exit code when launch returns.
    pub exit_on_launch: Option<i32>,
    /// SIGTERM is ignored; only `kill` ends the child.
    pub ignore_sigterm: bool,
}

#[derive(Debug)]
struct SimProcess {
    name: String,
    exit: Option<ExitInfo>,
    behavior: SimBehavior,
}

#[derive(Debug)]
struct SimState {
    next_pid: u32,
    processes: HashMap<u32, SimProcess>,
    latest: HashMap<String, u32>,
    behaviors: HashMap<String, SimBehavior>,
    launches: HashMap<String, u32>,
}

/// Launcher that fakes children in memory.
#[derive(Debug, Clone)]
pub struct SimulatedLauncher {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLauncher {
    /// Create an empty launcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                next_pid: FIRST_PID,
                processes: HashMap::new(),
                latest: HashMap::new(),
                behaviors: HashMap::new(),
                launches: HashMap::new(),
            })),
        }
    }

    /// Set how future launches of `name` behave.
    pub fn set_behavior(&self, name: &str, behavior: SimBehavior) {
        self.state.lock().behaviors.insert(name.to_string(), behavior);
    }

    /// Make the most recent child of `name` exit with `code`.
    ///
    /// Returns `false` when there is no live child to crash.
    pub fn crash(&self, name: &str, code: i32) -> bool {
        let mut state = self.state.lock();
        let Some(pid) = state.latest.get(name).copied() else {
            return false;
        };
        match state.processes.get_mut(&pid) {
            Some(process) if process.exit.is_none() => {
                process.exit = Some(ExitInfo::code(code));
                true
            }
            _ => false,
        }
    }

    /// How many times `name` has been launched successfully.
    #[must_use]
    pub fn launch_count(&self, name: &str) -> u32 {
        self.state.lock().launches.get(name).copied().unwrap_or(0)
    }

    /// Pid of the most recent child of `name`.
    #[must_use]
    pub fn latest_pid(&self, name: &str) -> Option<u32> {
        self.state.lock().latest.get(name).copied()
    }

    /// Whether the most recent child of `name` is still alive.
    #[must_use]
    pub fn is_alive(&self, name: &str) -> bool {
        let state = self.state.lock();
        state
            .latest
            .get(name)
            .and_then(|pid| state.processes.get(pid))
            .is_some_and(|p| p.exit.is_none())
    }

    /// Number of children that have not exited.
    #[must_use]
    pub fn live_children(&self) -> usize {
        self.state
            .lock()
            .processes
            .values()
            .filter(|p| p.exit.is_none())
            .count()
    }
}

impl ProcessLauncher for SimulatedLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>> {
        let mut state = self.state.lock();
        let behavior = state.behaviors.get(&spec.name).copied().unwrap_or_default();
        if behavior.fail_spawn {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("simulated spawn failure for {}", spec.command),
            ));
        }
        let pid = state.next_pid;
        state.next_pid += 1;
        state.processes.insert(
            pid,
            SimProcess {
                name: spec.name.clone(),
                exit: behavior.exit_on_launch.map(ExitInfo::code),
                behavior,
            },
        );
        state.latest.insert(spec.name.clone(), pid);
        *state.launches.entry(spec.name.clone()).or_insert(0) += 1;
        Ok(Box::new(SimChild {
            pid,
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimChild {
    pid: u32,
    state: Arc<Mutex<SimState>>,
}

impl SimChild {
    fn with_process<R>(&self, f: impl FnOnce(&mut SimProcess) -> R) -> io::Result<R> {
        let mut state = self.state.lock();
        state
            .processes
            .get_mut(&self.pid)
            .map(f)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown simulated pid"))
    }
}

impl ChildProcess for SimChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        self.with_process(|p| p.exit)
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.with_process(|p| {
            if p.exit.is_none() && !p.behavior.ignore_sigterm {
                p.exit = Some(ExitInfo::signal(SIGTERM));
            }
        })
    }

    fn kill(&mut self) -> io::Result<()> {
        self.with_process(|p| {
            if p.exit.is_none() {
                tracing::trace!(process = %p.name, "simulated kill");
                p.exit = Some(ExitInfo::signal(SIGKILL));
            }
        })
    }
}
