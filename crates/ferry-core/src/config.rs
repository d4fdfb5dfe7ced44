//! Configuration module
//!
//! Settings for a work queue instance. Values can be built in code, deserialized
//! with serde, or read from `FERRY_*` environment variables.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::QueueError;

const WORKER_THREAD_COUNT: usize = 1;
const RESPONSE_PROCESSING_TIME_LIMIT_MS: u64 = 8;
const THREAD_NAME_PREFIX: &str = "ferry-worker";

/// Work queue configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkQueueConfig {
    /// Number of worker threads started by `startup`.
    pub worker_thread_count: usize,
    /// Time budget for one `process_responses` call. 0 = unbounded.
    pub response_processing_time_limit_ms: u64,
    /// Advisory flag for the embedding application; the queue does not read it.
    pub workers_can_access_render_system: bool,
    /// Queue requests but do not hand them to workers.
    pub paused: bool,
    pub requests_accepted: bool,
    pub thread_name_prefix: String,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            worker_thread_count: WORKER_THREAD_COUNT,
            response_processing_time_limit_ms: RESPONSE_PROCESSING_TIME_LIMIT_MS,
            workers_can_access_render_system: true,
            paused: false,
            requests_accepted: true,
            thread_name_prefix: THREAD_NAME_PREFIX.to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl WorkQueueConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            worker_thread_count: env_or("FERRY_WORKER_THREADS", defaults.worker_thread_count),
            response_processing_time_limit_ms: env_or(
                "FERRY_RESPONSE_TIME_LIMIT_MS",
                defaults.response_processing_time_limit_ms,
            ),
            workers_can_access_render_system: env_or(
                "FERRY_WORKERS_ACCESS_RENDER_SYSTEM",
                defaults.workers_can_access_render_system,
            ),
            paused: env_or("FERRY_PAUSED", defaults.paused),
            requests_accepted: env_or("FERRY_REQUESTS_ACCEPTED", defaults.requests_accepted),
            thread_name_prefix: env::var("FERRY_THREAD_NAME_PREFIX")
                .unwrap_or(defaults.thread_name_prefix),
        };

        config
            .validate()
            .context("Invalid work queue configuration in environment")?;

        tracing::debug!(
            worker_thread_count = config.worker_thread_count,
            response_processing_time_limit_ms = config.response_processing_time_limit_ms,
            paused = config.paused,
            requests_accepted = config.requests_accepted,
            "Loaded work queue configuration from environment"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.worker_thread_count == 0 {
            return Err(QueueError::InvalidConfig(
                "worker_thread_count must be at least 1".to_string(),
            ));
        }

        if self.thread_name_prefix.trim().is_empty() {
            return Err(QueueError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Drain budget as a duration, None when unbounded.
    pub fn response_processing_time_limit(&self) -> Option<Duration> {
        match self.response_processing_time_limit_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
