//! Tracing-backed log sink

use std::fmt;

use tracing::debug;

use super::interceptor::LogSink;

/// Target used for exchange records, handy for `EnvFilter` directives
pub const EXCHANGE_TARGET: &str = "debughttp::exchange";

/// Emits exchange records as `DEBUG` events under [`EXCHANGE_TARGET`].
///
/// Whether anything is printed is up to the installed subscriber's filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log_request(&self, args: fmt::Arguments<'_>) {
        debug!(target: EXCHANGE_TARGET, direction = "request", "{}", args);
    }

    fn log_response(&self, args: fmt::Arguments<'_>) {
        debug!(target: EXCHANGE_TARGET, direction = "response", "{}", args);
    }
}
