//! Response sink shared by the handlers of one request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode};

#[derive(Debug, Default)]
struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
}

/// Status and headers accumulated while a request is handled.
///
/// Clones share the same head. The body is supplied once, when the
/// response is built with [`into_response`](ResponseSink::into_response).
#[derive(Debug, Clone, Default)]
pub struct ResponseSink(Arc<Mutex<ResponseHead>>);

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn head(&self) -> MutexGuard<'_, ResponseHead> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> StatusCode {
        self.head().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.head().status = status;
    }

    /// Replace any existing values for `name`.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.head().headers.insert(name, value);
    }

    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.head().headers.append(name, value);
    }

    pub fn headers(&self) -> HeaderMap {
        self.head().headers.clone()
    }

    /// Build the final response from the accumulated head.
    pub fn into_response<B>(&self, body: B) -> Response<B> {
        let head = self.head();
        let mut response = Response::new(body);
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers.clone();
        response
    }
}
