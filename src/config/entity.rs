//! Per-entity registration configuration: processes and bus devices.
//!
//! Both structs deserialize from JSON with sensible defaults and expose
//! `with_*` builders. Validation happens at the registration boundary so a
//! malformed entry never reaches a worker loop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{AppResult, ConfigError};
use crate::core::priority::{translate_with, OsSchedule, PriorityLevel, SchedPolicy};
use crate::infra::launcher::LaunchSpec;

const fn default_level() -> PriorityLevel {
    PriorityLevel::Medium
}

const fn default_true() -> bool {
    true
}

const fn default_max_restarts() -> u32 {
    3
}

const fn default_frequency_hz() -> u32 {
    100_000
}

const fn default_timeout_ms() -> u64 {
    10
}

const fn default_retry_budget() -> u32 {
    3
}

/// Crash-restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Restart after a crash.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Restarts allowed before the process is marked exhausted.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_restarts: default_max_restarts(),
        }
    }
}

impl RestartPolicy {
    /// Never restart.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            max_restarts: 0,
        }
    }
}

/// Registration of a supervised control process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Unique process name.
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Explicit policy; the level's default policy when unset.
    #[serde(default)]
    pub policy: Option<SchedPolicy>,
    /// Abstract priority level.
    #[serde(default = "default_level")]
    pub priority: PriorityLevel,
    /// CPU set; computed from the priority level when unset.
    #[serde(default)]
    pub cpu_affinity: Option<Vec<usize>>,
    /// Resident memory ceiling in MiB (warn only).
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// CPU usage ceiling in percent of one core (warn only).
    #[serde(default)]
    pub cpu_limit_percent: Option<f64>,
    /// Crash-restart policy.
    #[serde(default)]
    pub restart: RestartPolicy,
}

impl ProcessConfig {
    /// Create a config with defaults for everything but name and command.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            policy: None,
            priority: default_level(),
            cpu_affinity: None,
            memory_limit_mb: None,
            cpu_limit_percent: None,
            restart: RestartPolicy::default(),
        }
    }

    /// Set the command arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Request an explicit scheduling policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the priority level.
    #[must_use]
    pub fn with_priority(mut self, priority: PriorityLevel) -> Self {
        self.priority = priority;
        self
    }

    /// Pin to an explicit CPU set.
    #[must_use]
    pub fn with_affinity(mut self, cpus: Vec<usize>) -> Self {
        self.cpu_affinity = Some(cpus);
        self
    }

    /// Set the memory ceiling.
    #[must_use]
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// Set the CPU ceiling.
    #[must_use]
    pub fn with_cpu_limit_percent(mut self, percent: f64) -> Self {
        self.cpu_limit_percent = Some(percent);
        self
    }

    /// Set the restart policy.
    #[must_use]
    pub fn with_restart(mut self, enabled: bool, max_restarts: u32) -> Self {
        self.restart = RestartPolicy {
            enabled,
            max_restarts,
        };
        self
    }

    /// Policy that will be requested from the OS.
    #[must_use]
    pub fn effective_policy(&self) -> SchedPolicy {
        self.policy.unwrap_or_else(|| self.priority.default_policy())
    }

    /// OS schedule that will be requested.
    #[must_use]
    pub fn schedule(&self) -> OsSchedule {
        translate_with(self.priority, self.effective_policy())
    }

    /// Launch specification handed to the launcher port.
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            cwd: self.cwd.clone(),
        }
    }

    /// Validate against the host CPU count.
    pub fn validate(&self, cpu_count: usize) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand(self.name.clone()));
        }
        if let Some(cpus) = &self.cpu_affinity {
            if cpus.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "process `{}`: cpu_affinity must not be empty",
                    self.name
                )));
            }
            if let Some(&cpu) = cpus.iter().find(|&&cpu| cpu >= cpu_count) {
                return Err(ConfigError::InvalidCpu {
                    name: self.name.clone(),
                    cpu,
                    available: cpu_count,
                });
            }
        }
        if self.memory_limit_mb == Some(0) {
            return Err(ConfigError::InvalidValue(format!(
                "process `{}`: memory_limit_mb must be greater than 0",
                self.name
            )));
        }
        if let Some(limit) = self.cpu_limit_percent {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "process `{}`: cpu_limit_percent must be a positive number",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Registration of a device on a shared bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device name.
    pub name: String,
    /// Bus id from discovery.
    pub bus: u8,
    /// Device address on the bus.
    pub address: u16,
    /// Arbitration priority.
    #[serde(default = "default_level")]
    pub priority: PriorityLevel,
    /// Bus clock the device needs to meet its latency target.
    #[serde(default = "default_frequency_hz")]
    pub required_frequency_hz: u32,
    /// Maximum transactions per second; unlimited when unset.
    #[serde(default)]
    pub max_rate_hz: Option<f64>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total execution attempts per transaction.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl DeviceConfig {
    /// Create a config with defaults for everything but identity.
    pub fn new(name: impl Into<String>, bus: u8, address: u16) -> Self {
        Self {
            name: name.into(),
            bus,
            address,
            priority: default_level(),
            required_frequency_hz: default_frequency_hz(),
            max_rate_hz: None,
            timeout_ms: default_timeout_ms(),
            retry_budget: default_retry_budget(),
        }
    }

    /// Set the priority level.
    #[must_use]
    pub fn with_priority(mut self, priority: PriorityLevel) -> Self {
        self.priority = priority;
        self
    }

    /// Set the required bus frequency.
    #[must_use]
    pub fn with_required_frequency_hz(mut self, hz: u32) -> Self {
        self.required_frequency_hz = hz;
        self
    }

    /// Limit the transaction rate.
    #[must_use]
    pub fn with_max_rate_hz(mut self, hz: f64) -> Self {
        self.max_rate_hz = Some(hz);
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Set the retry budget (total attempts).
    #[must_use]
    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts;
        self
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Minimum spacing between two transactions, if rate limited.
    #[must_use]
    pub fn min_interval(&self) -> Option<Duration> {
        self.max_rate_hz.map(|hz| Duration::from_secs_f64(1.0 / hz))
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.address > 0x3FF {
            return Err(ConfigError::InvalidValue(format!(
                "device `{}`: address {:#x} exceeds 10-bit range",
                self.name, self.address
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "device `{}`: timeout_ms must be greater than 0",
                self.name
            )));
        }
        if self.retry_budget == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "device `{}`: retry_budget must be at least 1",
                self.name
            )));
        }
        if self.required_frequency_hz == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "device `{}`: required_frequency_hz must be greater than 0",
                self.name
            )));
        }
        if let Some(hz) = self.max_rate_hz {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "device `{}`: max_rate_hz must be a positive number",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Processes and devices to register at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Supervised processes.
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    /// Bus devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Manifest {
    /// Parse a manifest from JSON.
    pub fn from_json_str(input: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}
