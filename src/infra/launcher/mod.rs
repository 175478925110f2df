//! Process launching port.
//!
//! The supervisor never touches `std::process` directly; it asks a
//! [`ProcessLauncher`] for a [`ChildProcess`] and drives it through
//! `try_wait`, `terminate` and `kill`. The launch specification is opaque to
//! the core.

#[cfg(unix)]
pub mod native;
pub mod simulated;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[cfg(unix)]
pub use native::CommandLauncher;
pub use simulated::{SimBehavior, SimulatedLauncher};

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Supervisor-side process name.
    pub name: String,
    /// Executable.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment.
    pub env: BTreeMap<String, String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

/// How a child exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code for a normal exit.
    pub code: Option<i32>,
    /// Terminating signal.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Normal exit with a code.
    #[must_use]
    pub const fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Killed by a signal.
    #[must_use]
    pub const fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit"),
        }
    }
}

/// A launched process.
pub trait ChildProcess: Send {
    /// OS process id.
    fn pid(&self) -> u32;
    /// Non-blocking exit check; reaps the child once it has exited.
    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>>;
    /// Ask the process to exit (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;
    /// Force the process to exit (SIGKILL).
    fn kill(&mut self) -> io::Result<()>;
}

/// Launches processes.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the process described by `spec`.
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>>;
}
