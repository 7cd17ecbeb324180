//! Request/response logging round-tripper
//!
//! [`Interceptor`] wraps another [`RoundTrip`] and reports every exchange to
//! a [`LogSink`]: one record before the request goes out and, when it
//! succeeds, one record for the response.

use std::fmt;
use std::sync::Arc;

use super::transport::{RoundTrip, RoundTripError};
use super::{Request, Response};

/// Receiver of exchange log records
///
/// Calls are made on the caller's thread, in the middle of a round trip,
/// so implementations should return quickly.
pub trait LogSink: Send + Sync {
    fn log_request(&self, args: fmt::Arguments<'_>);
    fn log_response(&self, args: fmt::Arguments<'_>);
}

/// Logging wrapper around a round-tripper
pub struct Interceptor<T> {
    inner: T,
    sink: Arc<dyn LogSink>,
}

impl<T: RoundTrip> Interceptor<T> {
    pub fn new(inner: T, sink: Arc<dyn LogSink>) -> Self {
        Interceptor { inner, sink }
    }

    /// The wrapped round-tripper
    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: RoundTrip> RoundTrip for Interceptor<T> {
    fn round_trip(&self, request: &Request) -> Result<Response, RoundTripError> {
        let url = request.url().render();
        self.sink
            .log_request(format_args!("{} --> {}", request.method(), url));

        let response = self.inner.round_trip(request)?;

        self.sink
            .log_response(format_args!("{} <-- {}", response.status().code(), url));
        Ok(response)
    }
}

impl<T: fmt::Debug> fmt::Debug for Interceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
