//! HTTP/1.1 client stack
//!
//! Blocking HTTP/1.1 over plain TCP or TLS, a connection pool, and a
//! logging interceptor for debugging outbound traffic.
//!
//! # Architecture
//!
//! The I/O layer uses a session operations abstraction so that the same code
//! drives plain and encrypted connections:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` adds per-operation timeouts on top of a `SessionOps`
//! - `Connection` speaks HTTP/1.1 over a session
//! - `PooledTransport` keeps idle connections and implements `RoundTrip`
//! - `Interceptor` wraps any `RoundTrip` and logs each exchange
//!
//! # Examples
//!
//! ```no_run
//! use debughttp::http::{new_interceptor_http_client, TracingSink};
//! use debughttp::http::tls::ClientTlsConfig;
//! use std::sync::Arc;
//!
//! let client =
//!     new_interceptor_http_client(Arc::new(TracingSink), &ClientTlsConfig::new(), false)
//!         .unwrap();
//! let response = client.get("http://127.0.0.1:8080/").unwrap();
//! assert_eq!(response.status().code(), 200);
//! ```

pub mod chunked;
pub mod client;
pub mod connection;
pub mod headers;
pub mod interceptor;
pub mod message;
pub mod parser;
pub mod session;
pub mod sink;
pub mod tls;
pub mod transport;
pub mod url;

pub use client::{new_interceptor_http_client, new_interceptor_http_client_with, HttpClient};
pub use headers::Headers;
pub use interceptor::{Interceptor, LogSink};
pub use message::{Method, Request, RequestBuilder, Response, ResponseBuilder, Status, Version};
pub use session::{HttpSession, SessionOps};
pub use sink::TracingSink;
pub use transport::{PoolConfig, PooledTransport, RoundTrip, RoundTripError};
pub use self::url::Url;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 100;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
