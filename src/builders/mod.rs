//! Builders that assemble the scheduling core from configuration.

pub mod core_builder;

pub use core_builder::{build_core, register_manifest, CorePorts};
