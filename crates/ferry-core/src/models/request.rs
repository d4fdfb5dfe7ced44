use std::sync::atomic::{AtomicBool, Ordering};

use super::{ChannelId, Payload, RequestId, RequestType};

/// A unit of deferred work.
///
/// Everything but the abort flag is fixed at construction. The flag is set
/// at most once and never cleared, so a request can be shared between the
/// queue and its handler behind an `Arc`.
#[derive(Debug)]
pub struct Request {
    channel: ChannelId,
    request_type: RequestType,
    payload: Payload,
    retry_count: u8,
    id: RequestId,
    aborted: AtomicBool,
}

impl Request {
    pub fn new(
        channel: ChannelId,
        request_type: RequestType,
        payload: Payload,
        retry_count: u8,
        id: RequestId,
    ) -> Self {
        Self {
            channel,
            request_type,
            payload,
            retry_count,
            id,
            aborted: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Attempts left after the current one.
    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Mark the request as void work. Handlers already running are not
    /// interrupted; the eventual response loses its payload.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// The attempt that replaces this one after a failure: same identity,
    /// channel, type and payload with one retry fewer. Returns None once the
    /// retry budget is spent.
    pub fn next_attempt(&self) -> Option<Request> {
        let retry_count = self.retry_count.checked_sub(1)?;
        let next = Request::new(
            self.channel,
            self.request_type,
            self.payload.clone(),
            retry_count,
            self.id,
        );
        if self.aborted() {
            next.abort();
        }
        Some(next)
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.request_type == other.request_type
            && self.payload == other.payload
            && self.retry_count == other.retry_count
            && self.id == other.id
            && self.aborted() == other.aborted()
    }
}

impl Eq for Request {}
