//! Work queue: submission, worker main loop, retry, abort and response draining.
//!
//! Shutdown: [`WorkQueue::shutdown`] rejects new work, aborts everything in
//! flight and joins the workers. Responses already queued stay queued so a
//! last [`WorkQueue::process_responses`] can still deliver them.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ferry_core::{
    ChannelId, Clock, MonotonicClock, Payload, QueueError, Request, RequestId, RequestType,
    Response, WorkQueueConfig,
};

use crate::channels::ChannelRegistrar;
use crate::handler::{RequestHandler, ResponseHandler};
use crate::pool::{InlinePool, ThreadPool, WorkerPool};
use crate::queues::{AbortScope, QueueSet, QueueStats, Retired};
use crate::registry::HandlerRegistry;
use crate::resolution::{resolve, Resolution};

/// State shared between the owning `WorkQueue` and its workers.
struct Shared {
    channels: ChannelRegistrar,
    handlers: HandlerRegistry,
    queues: QueueSet,
    clock: Arc<dyn Clock>,
    paused: AtomicBool,
    response_time_limit_ms: AtomicU64,
    workers_can_access_render_system: AtomicBool,
}

impl Shared {
    /// Run `request` through its handlers until it is retired. Returns the
    /// response only for synchronous calls, which deliver it themselves.
    fn process(&self, request: Arc<Request>, synchronous: bool) -> Option<Response> {
        let mut request = request;
        loop {
            let response = self.handlers.dispatch_request(&request);
            if response.is_none() {
                tracing::warn!(
                    request_id = %request.id(),
                    channel = request.channel(),
                    request_type = request.request_type(),
                    "No handler accepted request, dropping it"
                );
            }

            let resolution = resolve(&request, response);
            match &resolution {
                Resolution::Retried { next, .. } => tracing::debug!(
                    request_id = %request.id(),
                    retries_left = next.retry_count(),
                    "Request failed, retrying"
                ),
                Resolution::Delivered(response) if !response.succeeded() => tracing::warn!(
                    request_id = %request.id(),
                    messages = response.messages(),
                    "Request failed, no retries left"
                ),
                _ => {}
            }

            match self.queues.retire(&request, resolution, synchronous) {
                Retired::RetryInline(next) => request = next,
                Retired::RetryRefused(delivered) => {
                    tracing::warn!(
                        request_id = %request.id(),
                        "Queue shutting down, delivering failure instead of retrying"
                    );
                    return match *delivered {
                        Retired::DeliverNow(response) => Some(response),
                        _ => None,
                    };
                }
                Retired::DeliverNow(response) => return Some(response),
                Retired::Dropped | Retired::Requeued | Retired::Queued => return None,
            }
        }
    }

    fn deliver(&self, response: &Response) {
        let called = self.handlers.dispatch_response(response);
        if called == 0 {
            tracing::trace!(
                request_id = %response.request().id(),
                channel = response.channel(),
                "No response handler for channel"
            );
        }
    }
}

/// What a worker pool sees of the queue.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl WorkerHandle {
    /// Move one request into the process queue and run it. Returns false when
    /// there was nothing to do or the queue is paused.
    pub fn process_next_request(&self) -> bool {
        if self.shared.paused.load(Ordering::Acquire) {
            return false;
        }
        let Some(request) = self.shared.queues.take_next() else {
            return false;
        };

        tracing::trace!(request_id = %request.id(), "Worker picked up request");
        self.shared.process(request, false);
        true
    }

    pub fn has_pending_work(&self) -> bool {
        !self.shared.paused.load(Ordering::Acquire) && self.shared.queues.has_pending()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.queues.shutting_down()
    }
}

/// Channel-partitioned background work queue.
///
/// Requests are submitted from any thread and executed by the worker pool.
/// Responses collect until the owning thread calls
/// [`process_responses`](Self::process_responses).
pub struct WorkQueue {
    shared: Arc<Shared>,
    pool: Box<dyn WorkerPool>,
    worker_thread_count: AtomicUsize,
    running: Mutex<bool>,
}

impl WorkQueue {
    /// Queue backed by OS worker threads. Call [`startup`](Self::startup)
    /// before expecting asynchronous requests to run.
    pub fn new(config: WorkQueueConfig) -> Self {
        let pool = ThreadPool::new(config.thread_name_prefix.clone());
        Self::with_parts(config, Box::new(pool), Arc::new(MonotonicClock::new()))
    }

    /// Queue without worker threads; every request runs on the submitting thread.
    pub fn inline(config: WorkQueueConfig) -> Self {
        Self::with_parts(config, Box::new(InlinePool), Arc::new(MonotonicClock::new()))
    }

    pub fn with_parts(
        config: WorkQueueConfig,
        pool: Box<dyn WorkerPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = Shared {
            channels: ChannelRegistrar::new(),
            handlers: HandlerRegistry::new(),
            queues: QueueSet::new(config.requests_accepted),
            clock,
            paused: AtomicBool::new(config.paused),
            response_time_limit_ms: AtomicU64::new(config.response_processing_time_limit_ms),
            workers_can_access_render_system: AtomicBool::new(
                config.workers_can_access_render_system,
            ),
        };

        Self {
            shared: Arc::new(shared),
            pool,
            worker_thread_count: AtomicUsize::new(config.worker_thread_count),
            running: Mutex::new(false),
        }
    }

    pub fn worker_handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Channel id for `name`, allocated on first use.
    pub fn get_channel(&self, name: &str) -> ChannelId {
        self.shared.channels.get_channel(name)
    }

    pub fn channels(&self) -> &ChannelRegistrar {
        &self.shared.channels
    }

    pub fn add_request_handler(
        &self,
        channel: ChannelId,
        handler: Arc<dyn RequestHandler>,
    ) -> bool {
        self.shared.handlers.add_request_handler(channel, handler)
    }

    /// Unregister `handler`. Does not wait for calls already running on workers.
    pub fn remove_request_handler(
        &self,
        channel: ChannelId,
        handler: &Arc<dyn RequestHandler>,
    ) -> bool {
        self.shared.handlers.remove_request_handler(channel, handler)
    }

    pub fn add_response_handler(
        &self,
        channel: ChannelId,
        handler: Arc<dyn ResponseHandler>,
    ) -> bool {
        self.shared.handlers.add_response_handler(channel, handler)
    }

    pub fn remove_response_handler(
        &self,
        channel: ChannelId,
        handler: &Arc<dyn ResponseHandler>,
    ) -> bool {
        self.shared.handlers.remove_response_handler(channel, handler)
    }

    /// Submit a request. Returns [`RequestId::REJECTED`] when the queue is
    /// not accepting requests or is shutting down.
    ///
    /// With `force_synchronous`, or when the pool has no threads, the request
    /// is processed on this thread and its response delivered before return.
    #[tracing::instrument(level = "debug", skip(self, payload))]
    pub fn add_request(
        &self,
        channel: ChannelId,
        request_type: RequestType,
        payload: Payload,
        retry_count: u8,
        force_synchronous: bool,
    ) -> RequestId {
        let synchronous = force_synchronous || !self.pool.supports_concurrency();
        let admitted =
            self.shared
                .queues
                .admit(channel, request_type, payload, retry_count, !synchronous);
        let Some(request) = admitted else {
            tracing::warn!(channel, "Queue is not accepting requests, rejecting");
            return RequestId::REJECTED;
        };

        let id = request.id();
        if synchronous {
            self.shared.queues.begin_inline(request.clone());
            if let Some(response) = self.shared.process(request, true) {
                self.shared.deliver(&response);
            }
        } else {
            tracing::trace!(request_id = %id, "Request queued");
            self.pool.notify_workers();
        }
        id
    }

    /// Mark the request with `id` aborted wherever it currently is.
    pub fn abort_request(&self, id: RequestId) {
        let marked = self
            .shared
            .queues
            .abort_matching(|r| r.id() == id, AbortScope::All);
        tracing::debug!(request_id = %id, marked, "Aborted request");
    }

    pub fn abort_requests_by_channel(&self, channel: ChannelId) {
        let marked = self
            .shared
            .queues
            .abort_matching(|r| r.channel() == channel, AbortScope::All);
        tracing::debug!(channel, marked, "Aborted requests on channel");
    }

    /// Like [`abort_requests_by_channel`](Self::abort_requests_by_channel)
    /// but leaves requests that a worker already picked up alone.
    pub fn abort_pending_requests_by_channel(&self, channel: ChannelId) {
        let marked = self
            .shared
            .queues
            .abort_matching(|r| r.channel() == channel, AbortScope::Pending);
        tracing::debug!(channel, marked, "Aborted pending requests on channel");
    }

    pub fn abort_all_requests(&self) {
        let marked = self.shared.queues.abort_matching(|_| true, AbortScope::All);
        tracing::debug!(marked, "Aborted all requests");
    }

    /// Deliver queued responses to their response handlers. Stops once the
    /// time limit has been exceeded, leaving the rest for the next call.
    /// Returns how many responses were delivered.
    pub fn process_responses(&self) -> usize {
        let limit = self.shared.response_time_limit_ms.load(Ordering::Relaxed);
        let started = self.shared.clock.now_ms();
        let mut delivered = 0;

        while let Some(response) = self.shared.queues.pop_response() {
            self.shared.deliver(&response);
            delivered += 1;

            if limit > 0 && self.shared.clock.now_ms().saturating_sub(started) > limit {
                tracing::trace!(delivered, limit_ms = limit, "Response time limit exceeded");
                break;
            }
        }
        delivered
    }

    /// Start the workers. When already running, `force_restart` shuts the
    /// pool down and starts it again; otherwise this does nothing.
    pub fn startup(&self, force_restart: bool) -> Result<(), QueueError> {
        let mut running = self.running.lock();
        if *running && !force_restart {
            return Ok(());
        }

        let thread_count = self.worker_thread_count.load(Ordering::Relaxed);
        if thread_count == 0 {
            return Err(QueueError::InvalidConfig(
                "worker_thread_count must be at least 1".to_string(),
            ));
        }

        if *running {
            // Pending requests stay queued, aborted, for the new workers.
            self.stop_workers(false);
            *running = false;
        }

        self.shared.queues.set_shutting_down(false);
        self.pool.start(self.worker_handle(), thread_count)?;
        *running = true;

        // Work submitted before startup is waiting.
        self.pool.notify_workers();
        tracing::info!(
            thread_count,
            concurrent = self.pool.supports_concurrency(),
            "Work queue started"
        );
        Ok(())
    }

    /// Stop accepting requests, abort everything in flight and join the
    /// workers. Safe to call more than once.
    pub fn shutdown(&self) {
        let mut running = self.running.lock();
        if self.shared.queues.shutting_down() {
            return;
        }
        self.stop_workers(true);
        *running = false;
        tracing::info!("Work queue shut down");
    }

    /// Abort everything and join the workers. With `drain`, requests that
    /// never reached a worker are discarded.
    fn stop_workers(&self, drain: bool) {
        self.shared.queues.set_shutting_down(true);
        self.abort_all_requests();
        self.pool.notify_workers();
        self.pool.stop();

        if !drain {
            return;
        }
        let dropped = self.shared.queues.drain_pending();
        if !dropped.is_empty() {
            tracing::warn!(
                dropped = dropped.len(),
                "Dropping requests that never reached a worker"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.queues.shutting_down()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.queues.stats()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// While paused, requests are queued but not handed to workers.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
        if !paused {
            self.pool.notify_workers();
        }
    }

    pub fn are_requests_accepted(&self) -> bool {
        self.shared.queues.accepting()
    }

    pub fn set_requests_accepted(&self, accepted: bool) {
        self.shared.queues.set_accepting(accepted);
    }

    /// Milliseconds, 0 = unbounded.
    pub fn response_processing_time_limit(&self) -> u64 {
        self.shared.response_time_limit_ms.load(Ordering::Relaxed)
    }

    pub fn set_response_processing_time_limit(&self, ms: u64) {
        self.shared.response_time_limit_ms.store(ms, Ordering::Relaxed);
    }

    pub fn worker_thread_count(&self) -> usize {
        self.worker_thread_count.load(Ordering::Relaxed)
    }

    /// Takes effect at the next [`startup`](Self::startup).
    pub fn set_worker_thread_count(&self, count: usize) {
        self.worker_thread_count.store(count, Ordering::Relaxed);
    }

    pub fn workers_can_access_render_system(&self) -> bool {
        self.shared
            .workers_can_access_render_system
            .load(Ordering::Relaxed)
    }

    pub fn set_workers_can_access_render_system(&self, allowed: bool) {
        self.shared
            .workers_can_access_render_system
            .store(allowed, Ordering::Relaxed);
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
