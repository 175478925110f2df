//! Ports to the outside world and their adapters: process launching, OS
//! scheduling and bus endpoints.

pub mod bus;
pub mod launcher;
pub mod scheduling;

pub use bus::{BusEndpoint, BusSpec, EndpointError, SimulatedBus};
pub use launcher::{ChildProcess, ExitInfo, LaunchSpec, ProcessLauncher, SimulatedLauncher};
pub use scheduling::{CpuTopology, SchedulingPort, SimulatedScheduler, UsageSample};
