//! Public facade over the scheduling core.

pub mod api;

pub use api::{Health, SchedulingCore};
