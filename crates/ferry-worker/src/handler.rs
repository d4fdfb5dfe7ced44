//! Handler traits
//!
//! Applications implement these for their own types and register them per
//! channel on the work queue. The queue only ever sees the traits.

use std::sync::Arc;

use ferry_core::{Request, Response};

/// Executes requests on worker threads.
///
/// Handlers run concurrently on several workers, and a handler may be
/// removed while one of its calls is still running.
pub trait RequestHandler: Send + Sync {
    /// Whether this handler wants `request`. Handlers registered later are
    /// asked first.
    fn can_handle_request(&self, _request: &Request) -> bool {
        true
    }

    /// Run the work. Returning None passes the request on to the next
    /// handler on the channel; a failed `Response` counts as handled and
    /// goes through the retry policy.
    fn handle_request(&self, request: &Arc<Request>) -> Option<Response>;
}

/// Consumes responses on the thread that drains the queue.
pub trait ResponseHandler: Send + Sync {
    fn can_handle_response(&self, _response: &Response) -> bool {
        true
    }

    fn handle_response(&self, response: &Response);
}

/// Handlers are identified by the allocation they live in.
pub(crate) fn same_handler<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
