//! Absolute request URLs
//!
//! Thin layer over [`url::Url`] exposing what an HTTP/1.1 client needs:
//! scheme, dial address, `Host` header and origin-form request target.
//! Parsing goes through the WHATWG parser, so tabs and newlines are dropped
//! and spaces are escaped before anything reaches the request line.

use std::borrow::Cow;
use std::fmt;

use percent_encoding::percent_decode_str;

use super::{Error, Result};

/// Supported URL schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A parsed absolute URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    inner: ::url::Url,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Url {
    /// Parse an absolute `http://` or `https://` URL
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &dyn fmt::Display| Error::InvalidUrl(format!("{}: {}", input, reason));

        let inner = ::url::Url::parse(input).map_err(|e| invalid(&e))?;
        let scheme = match inner.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(invalid(&"unsupported scheme")),
        };
        if !inner.username().is_empty() || inner.password().is_some() {
            return Err(invalid(&"userinfo is not supported"));
        }

        // IPv6 literals are dialed without brackets
        let host = match inner.host() {
            Some(::url::Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => return Err(invalid(&"missing host")),
        };
        let port = inner.port().unwrap_or_else(|| scheme.default_port());

        Ok(Url {
            inner,
            scheme,
            host,
            port,
        })
    }

    /// The normalized URL text
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host without brackets (IPv6 literals are bare)
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Origin-form request target (path and query, never the fragment)
    pub fn target(&self) -> Cow<'_, str> {
        match self.inner.query() {
            Some(query) => Cow::Owned(format!("{}?{}", self.inner.path(), query)),
            None => Cow::Borrowed(self.inner.path()),
        }
    }

    /// Value for the `Host` header; the default port is left out
    pub fn host_header(&self) -> String {
        let host = self.inner.host_str().unwrap_or(&self.host);
        match self.inner.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// The URL with percent-escapes decoded, or the undecoded text when an
    /// escape is malformed or the result is not UTF-8
    pub fn render(&self) -> Cow<'_, str> {
        let raw = self.inner.as_str();
        if has_malformed_escape(raw) {
            return Cow::Borrowed(raw);
        }
        match percent_decode_str(raw).decode_utf8() {
            Ok(decoded) => decoded,
            Err(_) => Cow::Borrowed(raw),
        }
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.inner.as_str())
    }
}

/// `percent_decode_str` passes a stray `%` through; treat it as an error
fn has_malformed_escape(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && !matches!(
                (bytes.get(i + 1), bytes.get(i + 2)),
                (Some(hi), Some(lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
    })
}
