//! Core configuration: supervisor, arbiter and telemetry thresholds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::backoff::BackoffPolicy;
use crate::core::error::AppResult;

/// Process supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Monitor tick period in milliseconds.
    pub monitor_interval_ms: u64,
    /// Resource usage is sampled every this many ticks.
    pub sample_every_ticks: u32,
    /// How long `start` watches a fresh process for an immediate exit.
    pub startup_grace_ms: u64,
    /// Graceful stop timeout used by `restart` and `deregister`.
    pub stop_timeout_ms: u64,
    /// Backoff between crash and restart.
    pub restart_backoff: BackoffPolicy,
    /// Events retained by the default in-memory audit sink.
    pub audit_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 100,
            sample_every_ticks: 10,
            startup_grace_ms: 50,
            stop_timeout_ms: 2_000,
            restart_backoff: BackoffPolicy::restarts(),
            audit_capacity: 1_024,
        }
    }
}

impl SupervisorConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the monitor tick period.
    #[must_use]
    pub const fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sample usage every `ticks` monitor ticks.
    #[must_use]
    pub const fn with_sample_every_ticks(mut self, ticks: u32) -> Self {
        self.sample_every_ticks = ticks;
        self
    }

    /// Set the startup grace period.
    #[must_use]
    pub const fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the default stop timeout.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the restart backoff.
    #[must_use]
    pub const fn with_restart_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Monitor tick period.
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Startup grace period.
    #[must_use]
    pub const fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    /// Default stop timeout.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.monitor_interval_ms == 0 {
            return Err("monitor_interval_ms must be greater than 0".into());
        }
        if self.sample_every_ticks == 0 {
            return Err("sample_every_ticks must be greater than 0".into());
        }
        if self.audit_capacity == 0 {
            return Err("audit_capacity must be greater than 0".into());
        }
        self.restart_backoff.validate()
    }
}

/// Bus arbiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Maximum queued transactions before rejection.
    pub max_queue_depth: usize,
    /// Congestion sampling window in milliseconds.
    pub congestion_window_ms: u64,
    /// Smoothing factor of the per-device latency average.
    pub latency_smoothing: f64,
    /// Backoff between failed attempts.
    pub retry_backoff: BackoffPolicy,
    /// Bus frequency when no servo-class device constrains it.
    pub default_bus_frequency_hz: u32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 1_024,
            congestion_window_ms: 1_000,
            latency_smoothing: 0.1,
            retry_backoff: BackoffPolicy::bus_retries(),
            default_bus_frequency_hz: 100_000,
        }
    }
}

impl ArbiterConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the congestion sampling window.
    #[must_use]
    pub const fn with_congestion_window(mut self, window: Duration) -> Self {
        self.congestion_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the latency smoothing factor.
    #[must_use]
    pub const fn with_latency_smoothing(mut self, alpha: f64) -> Self {
        self.latency_smoothing = alpha;
        self
    }

    /// Set the retry backoff.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the unconstrained bus frequency.
    #[must_use]
    pub const fn with_default_bus_frequency_hz(mut self, hz: u32) -> Self {
        self.default_bus_frequency_hz = hz;
        self
    }

    /// Congestion sampling window.
    #[must_use]
    pub const fn congestion_window(&self) -> Duration {
        Duration::from_millis(self.congestion_window_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.congestion_window_ms == 0 {
            return Err("congestion_window_ms must be greater than 0".into());
        }
        if !(self.latency_smoothing > 0.0 && self.latency_smoothing <= 1.0) {
            return Err("latency_smoothing must be in (0, 1]".into());
        }
        if self.default_bus_frequency_hz == 0 {
            return Err("default_bus_frequency_hz must be greater than 0".into());
        }
        self.retry_backoff.validate()
    }
}

/// Thresholds that trigger report recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryThresholds {
    /// Latency target for servo-class devices, in milliseconds.
    pub servo_latency_target_ms: f64,
    /// Bus utilization target (0..=1).
    pub bus_utilization_target: f64,
    /// Device error-rate target (0..=1).
    pub device_error_rate_target: f64,
}

impl Default for TelemetryThresholds {
    fn default() -> Self {
        Self {
            servo_latency_target_ms: 2.0,
            bus_utilization_target: 0.8,
            device_error_rate_target: 0.05,
        }
    }
}

impl TelemetryThresholds {
    /// Validate threshold values.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.servo_latency_target_ms > 0.0) {
            return Err("servo_latency_target_ms must be greater than 0".into());
        }
        for (name, value) in [
            ("bus_utilization_target", self.bus_utilization_target),
            ("device_error_rate_target", self.device_error_rate_target),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be in [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Supervisor section.
    pub supervisor: SupervisorConfig,
    /// Arbiter section.
    pub arbiter: ArbiterConfig,
    /// Telemetry thresholds.
    pub telemetry: TelemetryThresholds,
}

impl CoreConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.supervisor
            .validate()
            .map_err(|e| format!("supervisor invalid: {e}"))?;
        self.arbiter
            .validate()
            .map_err(|e| format!("arbiter invalid: {e}"))?;
        self.telemetry
            .validate()
            .map_err(|e| format!("telemetry invalid: {e}"))
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `ROBOSCHED_*` environment variables, after
    /// loading a `.env` file if one is present.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (`ROBOSCHED_MONITOR_INTERVAL_MS`, ...).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> AppResult<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}"))
        }

        if let Some(v) = lookup("ROBOSCHED_MONITOR_INTERVAL_MS") {
            self.supervisor.monitor_interval_ms = parse("ROBOSCHED_MONITOR_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_STARTUP_GRACE_MS") {
            self.supervisor.startup_grace_ms = parse("ROBOSCHED_STARTUP_GRACE_MS", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_STOP_TIMEOUT_MS") {
            self.supervisor.stop_timeout_ms = parse("ROBOSCHED_STOP_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_RESTART_BASE_MS") {
            self.supervisor.restart_backoff.base_ms = parse("ROBOSCHED_RESTART_BASE_MS", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_RESTART_MAX_MS") {
            self.supervisor.restart_backoff.max_ms = parse("ROBOSCHED_RESTART_MAX_MS", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_MAX_QUEUE_DEPTH") {
            self.arbiter.max_queue_depth = parse("ROBOSCHED_MAX_QUEUE_DEPTH", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_CONGESTION_WINDOW_MS") {
            self.arbiter.congestion_window_ms = parse("ROBOSCHED_CONGESTION_WINDOW_MS", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_LATENCY_SMOOTHING") {
            self.arbiter.latency_smoothing = parse("ROBOSCHED_LATENCY_SMOOTHING", &v)?;
        }
        if let Some(v) = lookup("ROBOSCHED_SERVO_LATENCY_TARGET_MS") {
            self.telemetry.servo_latency_target_ms =
                parse("ROBOSCHED_SERVO_LATENCY_TARGET_MS", &v)?;
        }
        Ok(())
    }
}
