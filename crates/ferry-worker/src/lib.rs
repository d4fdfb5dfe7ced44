//! Ferry Worker – channel-partitioned background work queue.
//!
//! Producers submit requests tagged with a channel and a request type. Worker
//! threads dispatch them to registered [`RequestHandler`]s, and the resulting
//! responses are handed to [`ResponseHandler`]s on the thread that calls
//! [`WorkQueue::process_responses`].

mod channels;
mod handler;
mod pool;
mod queue;
mod queues;
mod registry;
mod resolution;

pub use channels::ChannelRegistrar;
pub use handler::{RequestHandler, ResponseHandler};
pub use pool::{InlinePool, ThreadPool, WorkerPool};
pub use queue::{WorkQueue, WorkerHandle};
pub use queues::QueueStats;
pub use registry::HandlerRegistry;
pub use resolution::{resolve, Resolution};

pub use ferry_core::{
    ChannelId, Clock, ManualClock, MonotonicClock, Payload, QueueError, Request, RequestId,
    RequestType, Response, WorkQueueConfig,
};
