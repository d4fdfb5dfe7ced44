//! Error types module
//!
//! Queue-level outcomes are not errors: a rejected submission is signalled by
//! the zero request id and handler failures travel as responses. `QueueError`
//! covers the operational failures around starting and configuring a queue.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to spawn worker thread '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker pool is already running")]
    AlreadyRunning,
}

impl QueueError {
    /// Whether retrying the failed operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QueueError::WorkerSpawn { .. })
    }
}
