//! Ferry Infra - process-level plumbing shared by applications that embed
//! the work queue.

pub mod telemetry;

pub use telemetry::{init_telemetry, shutdown_telemetry};
