//! HTTP client facade
//!
//! [`HttpClient`] sends requests through any [`RoundTrip`]. The usual way to
//! get one is [`new_interceptor_http_client`], which stacks an
//! [`Interceptor`] on a [`PooledTransport`] configured from client TLS
//! settings.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use super::interceptor::{Interceptor, LogSink};
use super::tls::{ClientTlsConfig, ResolvedTlsConfig, TlsError};
use super::transport::{PoolConfig, PooledTransport, RoundTrip, RoundTripError};
use super::{Method, Request, Response};

/// HTTP client
pub struct HttpClient<T> {
    transport: T,
    timeout: Option<Duration>,
}

impl<T: RoundTrip> HttpClient<T> {
    pub fn new(transport: T) -> Self {
        HttpClient {
            transport,
            timeout: None,
        }
    }

    /// Default per-request timeout for requests built by [`get`](Self::get)
    /// and [`post`](Self::post)
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request
    pub fn send(&self, request: &Request) -> Result<Response, RoundTripError> {
        self.transport.round_trip(request)
    }

    /// Send a GET request
    pub fn get(&self, url: &str) -> Result<Response, RoundTripError> {
        let mut request = Request::new(Method::Get, url)?;
        request.set_timeout(self.timeout);
        self.send(&request)
    }

    /// Send a POST request with body
    pub fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> Result<Response, RoundTripError> {
        let mut request = Request::new(Method::Post, url)?;
        request.headers_mut().set("Content-Type", content_type);
        request.set_body(body);
        request.set_timeout(self.timeout);
        self.send(&request)
    }
}

impl HttpClient<Interceptor<PooledTransport>> {
    /// TLS settings of the pooled transport under the interceptor
    pub fn tls_config(&self) -> &ResolvedTlsConfig {
        self.transport.inner().tls_config()
    }
}

/// Client whose exchanges are logged to `sink`.
///
/// The transport uses `client_tls` when it carries resolved material and an
/// empty client configuration otherwise; `insecure` then decides whether
/// server certificates are verified.
pub fn new_interceptor_http_client(
    sink: Arc<dyn LogSink>,
    client_tls: &ClientTlsConfig,
    insecure: bool,
) -> Result<HttpClient<Interceptor<PooledTransport>>, TlsError> {
    new_interceptor_http_client_with(sink, client_tls, insecure, PoolConfig::default())
}

/// [`new_interceptor_http_client`] with explicit pool settings
pub fn new_interceptor_http_client_with(
    sink: Arc<dyn LogSink>,
    client_tls: &ClientTlsConfig,
    insecure: bool,
    pool: PoolConfig,
) -> Result<HttpClient<Interceptor<PooledTransport>>, TlsError> {
    let mut tls = client_tls
        .tls_config()
        .cloned()
        .unwrap_or_else(ResolvedTlsConfig::client);
    tls.set_insecure_skip_verify(insecure);

    debug!(
        insecure,
        client_certificate = !tls.certificates().is_empty(),
        custom_roots = tls.root_cas().is_some(),
        "building debug HTTP client"
    );

    let transport = PooledTransport::with_tls(pool, tls)?;
    Ok(HttpClient::new(Interceptor::new(transport, sink)))
}
