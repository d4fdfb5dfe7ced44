use std::sync::Arc;

use super::{ChannelId, Payload, Request};

/// Outcome of executing a [`Request`].
///
/// Built once by a handler and read-only afterwards, except that aborting
/// drops the result payload.
#[derive(Debug, Clone)]
pub struct Response {
    request: Arc<Request>,
    succeeded: bool,
    messages: String,
    data: Payload,
}

impl Response {
    pub fn new(
        request: Arc<Request>,
        succeeded: bool,
        data: Payload,
        messages: impl Into<String>,
    ) -> Self {
        Self {
            request,
            succeeded,
            messages: messages.into(),
            data,
        }
    }

    pub fn success(request: Arc<Request>, data: Payload) -> Self {
        Self::new(request, true, data, String::new())
    }

    pub fn failure(request: Arc<Request>, messages: impl Into<String>) -> Self {
        Self::new(request, false, Payload::empty(), messages)
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn channel(&self) -> ChannelId {
        self.request.channel()
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Diagnostic text supplied by the handler.
    pub fn messages(&self) -> &str {
        &self.messages
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// Abort the originating request and drop the result payload.
    pub fn abort_request(&mut self) {
        self.request.abort();
        self.data = Payload::empty();
    }

    pub fn into_data(self) -> Payload {
        self.data
    }
}
