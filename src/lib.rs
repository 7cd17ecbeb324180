//! debughttp - TLS material resolution and a logging HTTP/1.1 client
//!
//! This crate turns PEM certificate and key material (optionally encrypted,
//! optionally referenced through a secret store) into OpenSSL client and
//! server configurations, and provides a pooled HTTP/1.1 client whose
//! exchanges are reported to a log sink.

pub mod config;
pub mod http;
pub mod logging;
pub mod secrets;
