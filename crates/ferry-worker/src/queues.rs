//! The request, process and response queues.
//!
//! Each queue has its own lock. When more than one is needed they are taken
//! in the order process, request, response. This module is the only place
//! locks nest: moving a request between queues, retiring it (so a retry or
//! response appears before it leaves the process queue) and abort scans (so
//! nothing moving between queues is missed) all hold the process lock while
//! touching the other two.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use ferry_core::{ChannelId, Payload, Request, RequestId, RequestType, Response};

use crate::resolution::Resolution;

/// Queue lengths at one instant, each read under its own lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting for a worker.
    pub pending: usize,
    /// Picked up by a worker or running synchronously.
    pub in_process: usize,
    /// Waiting for `process_responses`.
    pub awaiting_delivery: usize,
}

/// Which queues an abort reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortScope {
    /// Request queue only.
    Pending,
    All,
}

/// What `retire` did with a request.
#[derive(Debug)]
pub(crate) enum Retired {
    Dropped,
    /// Failed attempt resubmitted to the request queue.
    Requeued,
    /// Failed attempt to be rerun on the calling thread; already in the
    /// process queue.
    RetryInline(Arc<Request>),
    /// Retry refused because the queue is shutting down; the failed response
    /// was handled as a final failure instead.
    RetryRefused(Box<Retired>),
    /// Response pushed to the response queue.
    Queued,
    /// Response for a synchronous request, to be dispatched by the caller.
    DeliverNow(Response),
}

#[derive(Debug)]
struct RequestQueue {
    queue: VecDeque<Arc<Request>>,
    last_id: u32,
    accepting: bool,
    shutting_down: bool,
}

impl RequestQueue {
    fn is_open(&self) -> bool {
        self.accepting && !self.shutting_down
    }

    fn allocate_id(&mut self) -> RequestId {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == 0 {
            tracing::warn!("Request id counter wrapped");
            self.last_id = 1;
        }
        RequestId::new(self.last_id)
    }
}

#[derive(Debug)]
pub(crate) struct QueueSet {
    process: Mutex<VecDeque<Arc<Request>>>,
    requests: Mutex<RequestQueue>,
    responses: Mutex<VecDeque<Response>>,
}

impl QueueSet {
    pub(crate) fn new(accepting: bool) -> Self {
        Self {
            process: Mutex::new(VecDeque::new()),
            requests: Mutex::new(RequestQueue {
                queue: VecDeque::new(),
                last_id: 0,
                accepting,
                shutting_down: false,
            }),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Allocate an id and build the request, or None when closed. With
    /// `enqueue` the request goes on the request queue in the same critical
    /// section; otherwise the caller runs it inline.
    pub(crate) fn admit(
        &self,
        channel: ChannelId,
        request_type: RequestType,
        payload: Payload,
        retry_count: u8,
        enqueue: bool,
    ) -> Option<Arc<Request>> {
        let mut requests = self.requests.lock();
        if !requests.is_open() {
            return None;
        }
        let id = requests.allocate_id();
        let request = Arc::new(Request::new(
            channel,
            request_type,
            payload,
            retry_count,
            id,
        ));
        if enqueue {
            requests.queue.push_back(request.clone());
        }
        Some(request)
    }

    /// Put an inline request in the process queue so aborts can reach it.
    pub(crate) fn begin_inline(&self, request: Arc<Request>) {
        self.process.lock().push_back(request);
    }

    /// Move the head of the request queue to the tail of the process queue.
    pub(crate) fn take_next(&self) -> Option<Arc<Request>> {
        let mut process = self.process.lock();
        let request = self.requests.lock().queue.pop_front()?;
        process.push_back(request.clone());
        Some(request)
    }

    /// Take `request` out of the process queue and act on its resolution.
    pub(crate) fn retire(
        &self,
        request: &Arc<Request>,
        resolution: Resolution,
        synchronous: bool,
    ) -> Retired {
        let mut process = self.process.lock();
        if let Some(index) = process.iter().position(|r| Arc::ptr_eq(r, request)) {
            process.remove(index);
        }

        match resolution {
            Resolution::Dropped => Retired::Dropped,
            Resolution::Retried { next, failed } => {
                if request.aborted() {
                    next.abort();
                }
                let next = Arc::new(next);
                let mut requests = self.requests.lock();
                if requests.shutting_down {
                    drop(requests);
                    let delivered = self.finish(request, failed, synchronous);
                    return Retired::RetryRefused(Box::new(delivered));
                }
                if synchronous {
                    drop(requests);
                    process.push_back(next.clone());
                    Retired::RetryInline(next)
                } else {
                    requests.queue.push_back(next);
                    Retired::Requeued
                }
            }
            Resolution::Delivered(response) => self.finish(request, response, synchronous),
        }
    }

    /// Queue `response`, or hand it back for synchronous delivery. Called
    /// with the process lock held.
    fn finish(
        &self,
        request: &Arc<Request>,
        mut response: Response,
        synchronous: bool,
    ) -> Retired {
        if request.aborted() && !response.data().is_empty() {
            response.abort_request();
        }
        if synchronous {
            Retired::DeliverNow(response)
        } else {
            self.responses.lock().push_back(response);
            Retired::Queued
        }
    }

    pub(crate) fn pop_response(&self) -> Option<Response> {
        self.responses.lock().pop_front()
    }

    /// Set the abort flag on every matching entry. Entries stay where they
    /// are. Returns the number of entries marked.
    pub(crate) fn abort_matching<F>(&self, matches: F, scope: AbortScope) -> usize
    where
        F: Fn(&Request) -> bool,
    {
        let mut marked = 0;
        let process = self.process.lock();

        for request in self.requests.lock().queue.iter() {
            if matches(request.as_ref()) {
                request.abort();
                marked += 1;
            }
        }
        if scope == AbortScope::Pending {
            return marked;
        }

        for request in process.iter() {
            if matches(request.as_ref()) {
                request.abort();
                marked += 1;
            }
        }
        for response in self.responses.lock().iter_mut() {
            if matches(response.request().as_ref()) {
                response.abort_request();
                marked += 1;
            }
        }
        marked
    }

    /// Remove everything still waiting for a worker.
    pub(crate) fn drain_pending(&self) -> Vec<Arc<Request>> {
        self.requests.lock().queue.drain(..).collect()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.requests.lock().queue.is_empty()
    }

    pub(crate) fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.requests.lock().queue.len(),
            in_process: self.process.lock().len(),
            awaiting_delivery: self.responses.lock().len(),
        }
    }

    pub(crate) fn accepting(&self) -> bool {
        self.requests.lock().accepting
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.requests.lock().accepting = accepting;
    }

    pub(crate) fn shutting_down(&self) -> bool {
        self.requests.lock().shutting_down
    }

    pub(crate) fn set_shutting_down(&self, shutting_down: bool) {
        self.requests.lock().shutting_down = shutting_down;
    }
}
