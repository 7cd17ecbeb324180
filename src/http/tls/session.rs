//! TLS session operations
//!
//! Implements [`SessionOps`] for TLS connections so the HTTP layer reads and
//! writes the same way over plain TCP and TLS.

use super::cert::CertInfo;
use super::config::TlsError;
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{SslAcceptor, SslConnector, SslStream};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::debug;

/// TLS session operations
///
/// Wraps an OpenSSL `SslStream` and provides poll/read/write/close.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Perform a client handshake on `tcp_stream`.
    ///
    /// `host` is sent as SNI and, when `verify_hostname` is set, checked
    /// against the server certificate. The handshake is bounded by
    /// `handshake_timeout`.
    pub fn connect(
        tcp_stream: TcpStream,
        connector: &SslConnector,
        host: &str,
        verify_hostname: bool,
        handshake_timeout: Option<Duration>,
    ) -> Result<Self, TlsError> {
        set_handshake_timeout(&tcp_stream, handshake_timeout)?;

        let ssl_stream = connector
            .configure()?
            .verify_hostname(verify_hostname)
            .connect(host, tcp_stream)
            .map_err(|e| TlsError::Handshake(format!("connect to {}: {}", host, e)))?;

        set_handshake_timeout(ssl_stream.get_ref(), None)?;

        debug!(
            host,
            version = ssl_stream.ssl().version_str(),
            peer = ?CertInfo::peer(ssl_stream.ssl()).map(|c| c.to_string()),
            "TLS client handshake complete"
        );

        Ok(TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        })
    }

    /// Perform a server handshake on `tcp_stream`
    pub fn accept(tcp_stream: TcpStream, acceptor: &SslAcceptor) -> Result<Self, TlsError> {
        let ssl_stream = acceptor
            .accept(tcp_stream)
            .map_err(|e| TlsError::Handshake(format!("accept: {}", e)))?;

        debug!(
            version = ssl_stream.ssl().version_str(),
            peer = ?CertInfo::peer(ssl_stream.ssl()).map(|c| c.to_string()),
            "TLS server handshake complete"
        );

        Ok(TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        })
    }

    /// Certificate presented by the peer, if any
    pub fn peer_certificate(&self) -> Option<CertInfo> {
        CertInfo::peer(self.stream.ssl())
    }

    /// Negotiated protocol version
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Check if a TLS read or write failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

fn set_handshake_timeout(stream: &TcpStream, timeout: Option<Duration>) -> Result<(), TlsError> {
    let io = |source| TlsError::Handshake(format!("setting handshake timeout: {}", source));
    stream.set_read_timeout(timeout).map_err(io)?;
    stream.set_write_timeout(timeout).map_err(io)?;
    Ok(())
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Decrypted bytes already buffered by OpenSSL
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.stream.ssl().pending() > 0
        {
            return Ok(true);
        }

        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        self.stream.read(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        self.stream
            .get_mut()
            .shutdown(Shutdown::Both)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tls::config::{ClientAuthPolicy, ResolvedTlsConfig};
    use crate::http::tls::fixtures::Fixtures;
    use crate::http::tls::CertPool;
    use std::net::TcpListener;
    use std::thread;

    fn trusting_client(fx: &Fixtures) -> ResolvedTlsConfig {
        let mut config = ResolvedTlsConfig::client();
        config.root_cas = Some(CertPool::from_pem(&fx.ca_cert_pem).unwrap());
        config
    }

    #[test]
    fn test_tls_client_server_handshake() {
        let fx = Fixtures::generate();
        let server_config = ResolvedTlsConfig::server(fx.server_key_pair());
        let client_config = trusting_client(&fx);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handle = thread::spawn(move || {
            let (tcp_stream, _) = listener.accept().unwrap();
            let mut tls_session = server_config.accept(tcp_stream).unwrap();

            let mut buf = [0u8; 5];
            let n = tls_session.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"Hello");

            tls_session.write(b"World").unwrap();
            tls_session.close().unwrap();
        });

        let connector = client_config.connector().unwrap();
        let tcp_stream = TcpStream::connect(addr).unwrap();
        let mut tls_session = TlsSessionOps::connect(
            tcp_stream,
            &connector,
            "localhost",
            true,
            Some(Duration::from_secs(5)),
        )
        .unwrap();

        assert!(tls_session.version().starts_with("TLS"));
        assert_eq!(tls_session.peer_certificate().unwrap().subject, "localhost");

        tls_session.write(b"Hello").unwrap();
        assert!(tls_session
            .poll(PollEvents::Read, Some(Duration::from_secs(5)))
            .unwrap());
        let mut buf = [0u8; 5];
        let n = tls_session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"World");
        assert!(!tls_session.failed());

        server_handle.join().unwrap();
    }

    #[test]
    fn test_untrusted_server_fails_verification() {
        let fx = Fixtures::generate();
        let server_config = ResolvedTlsConfig::server(fx.server_key_pair());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handle = thread::spawn(move || {
            let (tcp_stream, _) = listener.accept().unwrap();
            assert!(server_config.accept(tcp_stream).is_err());
        });

        // Empty root pool: the test CA is not trusted
        let mut client_config = ResolvedTlsConfig::client();
        client_config.root_cas = Some(CertPool::default());
        let connector = client_config.connector().unwrap();

        let tcp_stream = TcpStream::connect(addr).unwrap();
        let result = TlsSessionOps::connect(tcp_stream, &connector, "localhost", true, None);
        assert!(matches!(result, Err(TlsError::Handshake(_))));

        server_handle.join().unwrap();
    }

    #[test]
    fn test_required_client_certificate_missing() {
        let fx = Fixtures::generate();
        let mut server_config = ResolvedTlsConfig::server(fx.server_key_pair());
        server_config.client_cas = Some(CertPool::from_pem(&fx.ca_cert_pem).unwrap());
        server_config.client_auth = ClientAuthPolicy::RequireAndVerifyClientCert;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handle = thread::spawn(move || {
            let (tcp_stream, _) = listener.accept().unwrap();
            assert!(server_config.accept(tcp_stream).is_err());
        });

        let connector = trusting_client(&fx).connector().unwrap();
        let tcp_stream = TcpStream::connect(addr).unwrap();

        // TLS 1.3 may report the alert on the first read instead of the handshake
        if let Ok(mut session) =
            TlsSessionOps::connect(tcp_stream, &connector, "localhost", true, None)
        {
            let mut buf = [0u8; 1];
            let _ = session.write(b"x");
            assert!(!matches!(session.read(&mut buf), Ok(n) if n > 0));
        }

        server_handle.join().unwrap();
    }
}
