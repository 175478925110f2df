//! # robosched
//!
//! Scheduling core for a robot controller: real-time process supervision and
//! shared-bus arbitration.
//!
//! A robot runs a mix of latency-critical work (servo loops, balance control,
//! emergency stop) and best-effort work (logging, vision, planning) on one
//! host, and its sensors and actuators share a handful of I2C-style buses.
//! This crate keeps the critical work on time:
//!
//! - **PriorityModel**: six abstract priority levels translated into OS
//!   scheduling policies, real-time priorities and niceness.
//! - **ProcessSupervisor**: launches processes with their scheduling and CPU
//!   affinity applied, falls back to niceness when the OS refuses, detects
//!   exits and restarts with capped backoff, samples resource usage.
//! - **BusArbiter**: serializes transactions per bus in priority order with
//!   per-device FIFO, rate limiting and bounded retries, and tunes the bus
//!   clock to the most demanding latency-critical device.
//! - **TelemetryAggregator**: one consistent report across both components,
//!   with recommendations against configured thresholds.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use robosched::builders::{build_core, CorePorts};
//! use robosched::config::{CoreConfig, DeviceConfig, ProcessConfig};
//! use robosched::core::PriorityLevel;
//! use robosched::infra::bus::{BusSpec, SimulatedBus};
//! use robosched::infra::scheduling::CpuTopology;
//!
//! # fn main() -> robosched::core::AppResult<()> {
//! robosched::util::init_tracing();
//! let bus = Arc::new(SimulatedBus::new());
//! let core = build_core(
//!     &CoreConfig::from_env()?,
//!     CorePorts::simulated(CpuTopology::uniform(4), vec![BusSpec::new(1, 400_000, bus)]),
//! )?;
//!
//! core.register_process(
//!     ProcessConfig::new("balance", "/opt/robot/balance").with_priority(PriorityLevel::Critical),
//! )?;
//! core.start("balance")?;
//!
//! let imu = core.register_device(
//!     DeviceConfig::new("imu", 1, 0x68).with_priority(PriorityLevel::Emergency),
//! )?;
//! let reading = core.submit(&imu, vec![0x3B], 6, None)?.wait()?;
//! assert_eq!(reading.len(), 6);
//!
//! println!("{}", core.snapshot().to_json()?);
//! core.stop("balance", Duration::from_secs(2))?;
//! core.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! On Linux, [`builders::CorePorts::native`] drives the real kernel and spawns
//! real processes; real-time policies need `CAP_SYS_NICE` and degrade to
//! niceness without it.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Priority model, supervisor, arbiter and telemetry.
pub mod core;
/// Configuration models for the core and registered entities.
pub mod config;
/// Builders to assemble the core from configuration.
pub mod builders;
/// Ports and adapters: process launching, OS scheduling, buses.
pub mod infra;
/// Public facade.
pub mod runtime;
/// Shared utilities.
pub mod util;
