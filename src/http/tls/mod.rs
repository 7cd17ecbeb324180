//! TLS material and sessions
//!
//! Turns PEM material on disk (possibly encrypted, possibly referenced
//! through a secret-store URI) into OpenSSL connectors and acceptors.
//!
//! # Architecture
//!
//! 1. `material` decodes certificate and key files into a [`KeyPair`] and
//!    [`CertPool`]s
//! 2. [`ClientTlsConfig`] and [`ServerTlsConfig`] describe what to load and
//!    resolve it into a [`ResolvedTlsConfig`]
//! 3. [`TlsSessionOps`] implements the `SessionOps` trait for encrypted I/O,
//!    so HTTP code is unchanged over TLS
//!
//! # Examples
//!
//! ```no_run
//! use debughttp::http::tls::ServerTlsConfig;
//! use debughttp::secrets::NoSecrets;
//! use std::net::TcpListener;
//!
//! let config = ServerTlsConfig {
//!     enabled: true,
//!     cert_file: "server.pem".to_string(),
//!     key_file: "server.key".to_string(),
//!     ..Default::default()
//! };
//! let tls = config.resolve(&NoSecrets).unwrap().expect("TLS enabled");
//!
//! let listener = TcpListener::bind("127.0.0.1:8443").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let session = tls.accept(tcp_stream).unwrap();
//! ```

pub mod cert;
pub mod client;
pub mod config;
pub mod material;
pub mod server;
pub mod session;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cert::CertInfo;
pub use client::ClientTlsConfig;
pub use config::{CertPool, ClientAuthPolicy, ResolvedTlsConfig, Role, TlsError, TlsVersion};
pub use material::{check_file_exists, get_x509_key_pair, load_cert_pool, KeyPair};
pub use server::{ClientAuthMode, ServerTlsConfig};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
