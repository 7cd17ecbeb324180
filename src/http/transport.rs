//! Connection-pooled HTTP/1.1 transport
//!
//! [`PooledTransport`] keeps idle keep-alive connections keyed by scheme,
//! host and port, dials new ones with `socket2`, and performs the TLS
//! handshake for `https` URLs with its [`ResolvedTlsConfig`].

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use openssl::ssl::SslConnector;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tracing::{debug, trace};

use super::connection::{BoxedSession, Connection};
use super::session::FdSessionOps;
use super::tls::{ResolvedTlsConfig, TlsError, TlsSessionOps};
use super::url::{Scheme, Url};
use super::{Error, Request, Response};

/// Something that turns a request into a response
pub trait RoundTrip: Send + Sync {
    fn round_trip(&self, request: &Request) -> Result<Response, RoundTripError>;
}

impl<T: RoundTrip + ?Sized> RoundTrip for Arc<T> {
    fn round_trip(&self, request: &Request) -> Result<Response, RoundTripError> {
        (**self).round_trip(request)
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for Box<T> {
    fn round_trip(&self, request: &Request) -> Result<Response, RoundTripError> {
        (**self).round_trip(request)
    }
}

/// A failed round trip
///
/// Carries whatever part of the response arrived before the failure, for
/// example the head of a response whose body was cut short.
#[derive(Debug, thiserror::Error)]
#[error("round trip failed: {error}")]
pub struct RoundTripError {
    #[source]
    error: Error,
    response: Option<Response>,
}

impl RoundTripError {
    pub fn new(error: Error) -> Self {
        RoundTripError {
            error,
            response: None,
        }
    }

    pub fn with_response(error: Error, response: Response) -> Self {
        RoundTripError {
            error,
            response: Some(response),
        }
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    /// The partial response, if any arrived
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn into_parts(self) -> (Error, Option<Response>) {
        (self.error, self.response)
    }
}

impl From<Error> for RoundTripError {
    fn from(error: Error) -> Self {
        RoundTripError::new(error)
    }
}

impl From<TlsError> for RoundTripError {
    fn from(error: TlsError) -> Self {
        RoundTripError::new(Error::Tls(error))
    }
}

/// Pool and timeout settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle connections kept across all hosts
    pub max_idle: usize,
    /// Idle connections kept per scheme, host and port
    pub max_idle_per_host: usize,
    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// TCP keep-alive probe interval
    pub keepalive: Duration,
    pub handshake_timeout: Duration,
    /// Read/write timeout when the request does not set one
    pub io_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle: 100,
            max_idle_per_host: 2,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(30),
            keepalive: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl PoolKey {
    fn for_url(url: &Url) -> Self {
        PoolKey {
            scheme: url.scheme(),
            host: url.host().to_ascii_lowercase(),
            port: url.port(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

#[derive(Default)]
struct IdlePool {
    conns: HashMap<PoolKey, Vec<Connection>>,
    total: usize,
}

/// HTTP/1.1 transport with keep-alive connection reuse
pub struct PooledTransport {
    config: PoolConfig,
    tls: ResolvedTlsConfig,
    connector: SslConnector,
    idle: Mutex<IdlePool>,
}

impl PooledTransport {
    /// Transport with default TLS settings (system roots, full verification)
    pub fn new(config: PoolConfig) -> Result<Self, TlsError> {
        Self::with_tls(config, ResolvedTlsConfig::client())
    }

    /// Transport using `tls` for `https` URLs
    pub fn with_tls(config: PoolConfig, tls: ResolvedTlsConfig) -> Result<Self, TlsError> {
        let connector = tls.connector()?;
        Ok(PooledTransport {
            config,
            tls,
            connector,
            idle: Mutex::new(IdlePool::default()),
        })
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.config
    }

    /// TLS settings used for `https` connections
    pub fn tls_config(&self) -> &ResolvedTlsConfig {
        &self.tls
    }

    /// Number of idle connections currently pooled
    pub fn idle_connections(&self) -> usize {
        self.lock_idle().total
    }

    /// Close every idle connection
    pub fn close_idle_connections(&self) {
        let drained: Vec<Connection> = {
            let mut idle = self.lock_idle();
            idle.total = 0;
            idle.conns.drain().flat_map(|(_, conns)| conns).collect()
        };
        for conn in drained {
            conn.close();
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, IdlePool> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the most recently used healthy idle connection for `key`
    fn checkout(&self, key: &PoolKey) -> Option<Connection> {
        loop {
            let candidate = {
                let mut idle = self.lock_idle();
                let conns = idle.conns.get_mut(key)?;
                let conn = conns.pop();
                if conns.is_empty() {
                    idle.conns.remove(key);
                }
                if conn.is_some() {
                    idle.total -= 1;
                }
                conn
            }?;

            if candidate.idle_for() > self.config.idle_timeout {
                debug!(%key, "closing expired idle connection");
                candidate.close();
            } else if candidate.is_stale() {
                debug!(%key, "dropping stale idle connection");
                candidate.close();
            } else {
                trace!(%key, exchanges = candidate.exchanges(), "reusing idle connection");
                return Some(candidate);
            }
        }
    }

    fn checkin(&self, key: PoolKey, conn: Connection) {
        let rejected = {
            let mut idle = self.lock_idle();
            let full = idle.total >= self.config.max_idle
                || idle
                    .conns
                    .get(&key)
                    .is_some_and(|c| c.len() >= self.config.max_idle_per_host);
            if full {
                Some(conn)
            } else {
                trace!(%key, "returning connection to pool");
                idle.conns.entry(key).or_default().push(conn);
                idle.total += 1;
                None
            }
        };

        if let Some(conn) = rejected {
            trace!("idle pool full, closing connection");
            conn.close();
        }
    }

    fn dial(&self, url: &Url) -> Result<Connection, RoundTripError> {
        let stream = self.connect_tcp(url.host(), url.port())?;
        let io_timeout = Some(self.config.io_timeout);

        let session: BoxedSession = match url.scheme() {
            Scheme::Http => Box::new(FdSessionOps::new(stream)),
            Scheme::Https => Box::new(TlsSessionOps::connect(
                stream,
                &self.connector,
                url.host(),
                !self.tls.insecure_skip_verify(),
                Some(self.config.handshake_timeout),
            )?),
        };

        Ok(Connection::new(session, io_timeout))
    }

    fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, Error> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        let mut last_err = None;

        for addr in addrs {
            debug!(%addr, host, "dialing");
            match self.connect_addr(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "connect failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Io(e),
            None => Error::Protocol(format!("{}: no addresses resolved", host)),
        })
    }

    fn connect_addr(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.set_tcp_keepalive(
            &TcpKeepalive::new()
                .with_time(self.config.keepalive)
                .with_interval(self.config.keepalive),
        )?;
        socket.connect_timeout(&addr.into(), self.config.connect_timeout)?;
        Ok(socket.into())
    }
}

impl RoundTrip for PooledTransport {
    fn round_trip(&self, request: &Request) -> Result<Response, RoundTripError> {
        let key = PoolKey::for_url(request.url());
        let mut conn = match self.checkout(&key) {
            Some(conn) => conn,
            None => self.dial(request.url())?,
        };

        match conn.send(request) {
            Ok(exchange) => {
                if exchange.reusable {
                    self.checkin(key, conn);
                } else {
                    conn.close();
                }
                Ok(exchange.response)
            }
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }
}

impl fmt::Debug for PooledTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledTransport")
            .field("config", &self.config)
            .field("tls", &self.tls)
            .field("idle", &self.idle_connections())
            .finish_non_exhaustive()
    }
}
