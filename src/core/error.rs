//! Error types for supervisor and arbiter operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid registration, rejected before anything is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Entity name is empty.
    #[error("name must not be empty")]
    EmptyName,
    /// Process launch command is empty.
    #[error("process `{0}`: command must not be empty")]
    EmptyCommand(String),
    /// CPU index outside the detected CPU set.
    #[error("process `{name}`: cpu {cpu} out of range (detected {available} cpus)")]
    InvalidCpu {
        /// Process name.
        name: String,
        /// Offending CPU index.
        cpu: usize,
        /// Number of CPUs detected on the host.
        available: usize,
    },
    /// A process with this name is already registered.
    #[error("process `{0}` already registered")]
    DuplicateProcess(String),
    /// A device already occupies this bus address, or the name is taken.
    #[error("device `{name}` conflicts with an existing device on bus {bus} address {address:#04x}")]
    DuplicateDevice {
        /// Device name.
        name: String,
        /// Bus id.
        bus: u8,
        /// Device address.
        address: u16,
    },
    /// The bus was not part of the discovered set.
    #[error("device `{name}`: bus {bus} was not discovered")]
    UnknownBus {
        /// Device name.
        name: String,
        /// Bus id.
        bus: u8,
    },
    /// Any other out-of-range field.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// The OS refused a scheduling request. Recorded on the process as degraded
/// mode; the process keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SchedulingError {
    /// Real-time policy refused.
    #[error("policy {policy} refused: {reason}")]
    PolicyRejected {
        /// Requested policy and priority.
        policy: String,
        /// OS error text.
        reason: String,
    },
    /// Niceness refused.
    #[error("niceness {value} refused: {reason}")]
    NicenessRejected {
        /// Requested niceness.
        value: i32,
        /// OS error text.
        reason: String,
    },
    /// CPU affinity refused.
    #[error("affinity {cpus:?} refused: {reason}")]
    AffinityRejected {
        /// Requested CPU set.
        cpus: Vec<usize>,
        /// OS error text.
        reason: String,
    },
}

/// A process could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    /// The launcher could not spawn the command.
    #[error("process `{name}` failed to spawn: {reason}")]
    Spawn {
        /// Process name.
        name: String,
        /// OS error text.
        reason: String,
    },
    /// The process exited during its startup grace period.
    #[error("process `{name}` exited immediately (code {code:?})")]
    ExitedImmediately {
        /// Process name.
        name: String,
        /// Exit code, if it exited normally.
        code: Option<i32>,
    },
    /// Neither the requested policy nor any niceness could be applied.
    #[error("process `{name}` has no usable scheduling fallback: {reason}")]
    NoFallback {
        /// Process name.
        name: String,
        /// Last scheduling error.
        reason: String,
    },
}

/// Operation-level supervisor error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// Registration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Launch failed; the process is Stopped.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// No process with this name.
    #[error("unknown process `{0}`")]
    UnknownProcess(String),
    /// A stop is already waiting on this process.
    #[error("process `{0}` is being stopped")]
    StopInProgress(String),
    /// The supervisor has been shut down.
    #[error("supervisor has been shut down")]
    Shutdown,
}

/// A bus transaction failed or was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BusError {
    /// The device did not answer in time on every attempt.
    #[error("transaction timed out after {attempts} attempt(s)")]
    Timeout {
        /// Attempts made.
        attempts: u32,
    },
    /// The device did not acknowledge.
    #[error("device did not acknowledge after {attempts} attempt(s)")]
    NoAck {
        /// Attempts made.
        attempts: u32,
    },
    /// The bus reported a fault.
    #[error("bus fault after {attempts} attempt(s): {reason}")]
    BusFault {
        /// Attempts made.
        attempts: u32,
        /// Fault text from the endpoint.
        reason: String,
    },
    /// Cancelled before execution.
    #[error("transaction cancelled")]
    Cancelled,
    /// The arbiter has been shut down.
    #[error("arbiter has been shut down")]
    Shutdown,
    /// The arbiter queue is full.
    #[error("queue full (depth {0})")]
    QueueFull(usize),
    /// Device not registered, or the handle is stale.
    #[error("unknown device `{0}`")]
    UnknownDevice(String),
}

/// A supervisor or arbiter could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The background thread could not be spawned.
    #[error("failed to spawn {thread} thread: {reason}")]
    WorkerSpawn {
        /// Thread name.
        thread: &'static str,
        /// OS error text.
        reason: String,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
