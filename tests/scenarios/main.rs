//! End-to-end scenarios through the assembled scheduling core.

#[path = "../common/mod.rs"]
mod common;

mod bus_clock;
mod crash_loop;
mod manifest;
