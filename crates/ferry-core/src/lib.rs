//! Ferry Core Library
//!
//! This crate provides the domain models, error types, configuration and
//! collaborator traits shared by the Ferry work queue components.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::WorkQueueConfig;
pub use error::QueueError;
pub use models::{ChannelId, Payload, Request, RequestId, RequestType, Response};
