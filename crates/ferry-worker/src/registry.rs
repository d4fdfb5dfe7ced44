//! Per-channel handler registry and dispatch.
//!
//! Request handlers are wrapped in holders so that removing one never waits
//! for, or races with, workers currently dispatching to it. Response handlers
//! only run on the draining thread and are stored directly.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use ferry_core::{ChannelId, Request, Response};

use crate::handler::{same_handler, RequestHandler, ResponseHandler};

/// Removal-safe wrapper around a registered request handler.
struct RequestHandlerHolder {
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
}

impl RequestHandlerHolder {
    fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            handler: RwLock::new(Some(handler)),
        }
    }

    fn holds(&self, handler: &Arc<dyn RequestHandler>) -> bool {
        self.handler
            .read()
            .as_ref()
            .is_some_and(|h| same_handler(h, handler))
    }

    /// Detach the handler. Calls already running finish on their own
    /// reference; later dispatches see an empty holder.
    fn disconnect(&self) {
        *self.handler.write() = None;
    }

    fn handle(&self, request: &Arc<Request>) -> Option<Response> {
        let handler = self.handler.read().clone()?;
        if !handler.can_handle_request(request) {
            return None;
        }
        handler.handle_request(request)
    }
}

type RequestHandlerMap = HashMap<ChannelId, Vec<Arc<RequestHandlerHolder>>>;
type ResponseHandlerMap = HashMap<ChannelId, Vec<Arc<dyn ResponseHandler>>>;

/// Handlers registered per channel, in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    request_handlers: Mutex<RequestHandlerMap>,
    response_handlers: Mutex<ResponseHandlerMap>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the handler is already registered on `channel`.
    pub fn add_request_handler(
        &self,
        channel: ChannelId,
        handler: Arc<dyn RequestHandler>,
    ) -> bool {
        let mut map = self.request_handlers.lock();
        let holders = map.entry(channel).or_default();
        if holders.iter().any(|holder| holder.holds(&handler)) {
            tracing::debug!(channel, "Request handler already registered");
            return false;
        }
        holders.push(Arc::new(RequestHandlerHolder::new(handler)));
        tracing::debug!(channel, handlers = holders.len(), "Request handler added");
        true
    }

    pub fn remove_request_handler(
        &self,
        channel: ChannelId,
        handler: &Arc<dyn RequestHandler>,
    ) -> bool {
        let mut map = self.request_handlers.lock();
        let Some(holders) = map.get_mut(&channel) else {
            return false;
        };
        let Some(index) = holders.iter().position(|holder| holder.holds(handler)) else {
            return false;
        };

        let holder = holders.remove(index);
        holder.disconnect();
        if holders.is_empty() {
            map.remove(&channel);
        }
        tracing::debug!(channel, "Request handler removed");
        true
    }

    /// Returns false when the handler is already registered on `channel`.
    pub fn add_response_handler(
        &self,
        channel: ChannelId,
        handler: Arc<dyn ResponseHandler>,
    ) -> bool {
        let mut map = self.response_handlers.lock();
        let handlers = map.entry(channel).or_default();
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            tracing::debug!(channel, "Response handler already registered");
            return false;
        }
        handlers.push(handler);
        true
    }

    pub fn remove_response_handler(
        &self,
        channel: ChannelId,
        handler: &Arc<dyn ResponseHandler>,
    ) -> bool {
        let mut map = self.response_handlers.lock();
        let Some(handlers) = map.get_mut(&channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            map.remove(&channel);
        }
        removed
    }

    pub fn request_handler_count(&self, channel: ChannelId) -> usize {
        self.request_handlers
            .lock()
            .get(&channel)
            .map_or(0, Vec::len)
    }

    pub fn response_handler_count(&self, channel: ChannelId) -> usize {
        self.response_handlers
            .lock()
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Offer `request` to its channel's handlers, newest first, until one
    /// produces a response. Runs without holding the registry lock.
    pub fn dispatch_request(&self, request: &Arc<Request>) -> Option<Response> {
        let holders = self
            .request_handlers
            .lock()
            .get(&request.channel())
            .cloned()?;

        holders.iter().rev().find_map(|holder| holder.handle(request))
    }

    /// Hand `response` to every accepting handler on its channel, newest
    /// first. Returns how many handlers were called.
    pub fn dispatch_response(&self, response: &Response) -> usize {
        let Some(handlers) = self
            .response_handlers
            .lock()
            .get(&response.channel())
            .cloned()
        else {
            return 0;
        };

        let mut called = 0;
        for handler in handlers.iter().rev() {
            if handler.can_handle_response(response) {
                handler.handle_response(response);
                called += 1;
            }
        }
        called
    }
}
