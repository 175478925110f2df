//! Configuration models for the supervisor, the arbiter and registered entities.

pub mod entity;
pub mod system;

pub use entity::{DeviceConfig, Manifest, ProcessConfig, RestartPolicy};
pub use system::{ArbiterConfig, CoreConfig, SupervisorConfig, TelemetryThresholds};
