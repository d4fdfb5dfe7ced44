//! Tracing subscriber setup
//!
//! The work queue only emits `tracing` events; installing a subscriber is up
//! to the embedding application, usually through [`init_telemetry`].

mod init;

pub use init::{init_telemetry, shutdown_telemetry, DEFAULT_FILTER};
