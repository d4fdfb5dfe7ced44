//! What happens to a request once its handlers have run.

use ferry_core::{Request, Response};

#[derive(Debug)]
pub enum Resolution {
    /// Hand the response to response handlers. Final failures land here too.
    Delivered(Response),
    /// Failed with retries left; `next` replaces the request. `failed` is
    /// kept in case the retry cannot be queued.
    Retried { next: Request, failed: Response },
    /// No handler produced a response.
    Dropped,
}

/// Decide the fate of `request` given what its handlers returned.
///
/// A failed response with retries remaining is set aside in favour of the
/// next attempt. Responses to aborted requests lose their payload.
pub fn resolve(request: &Request, response: Option<Response>) -> Resolution {
    let Some(mut response) = response else {
        return Resolution::Dropped;
    };

    if !response.succeeded() {
        if let Some(next) = request.next_attempt() {
            return Resolution::Retried {
                next,
                failed: response,
            };
        }
    }

    if request.aborted() {
        response.abort_request();
    }
    Resolution::Delivered(response)
}
