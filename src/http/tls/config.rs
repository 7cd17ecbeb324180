//! Resolved TLS configuration
//!
//! [`ResolvedTlsConfig`] is the materialized output of the TLS material
//! resolver: key pairs, CA pools and policy flags. It is immutable once
//! built (apart from the skip-verify overlay applied by the HTTP client) and
//! produces OpenSSL connectors and acceptors on demand.

use std::fmt;
use std::net::TcpStream;
use std::path::PathBuf;

use openssl::error::ErrorStack;
use openssl::ssl::{
    SslAcceptor, SslConnector, SslContextBuilder, SslMethod, SslOptions, SslVerifyMode,
    SslVersion,
};
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::X509;

use super::material::KeyPair;
use crate::secrets::SecretError;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// Server-side client certificate policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuthPolicy {
    /// Don't request client certificates
    #[default]
    NoClientCert,
    /// Request a client certificate but don't verify it
    RequestClientCert,
    /// Verify the client certificate if one is presented
    VerifyClientCertIfGiven,
    /// Require a client certificate and verify it
    RequireAndVerifyClientCert,
    /// Require a client certificate but accept any
    RequireAnyClientCert,
}

impl ClientAuthPolicy {
    /// OpenSSL verify mode for this policy
    pub fn verify_mode(self) -> SslVerifyMode {
        match self {
            ClientAuthPolicy::NoClientCert => SslVerifyMode::NONE,
            ClientAuthPolicy::RequestClientCert | ClientAuthPolicy::VerifyClientCertIfGiven => {
                SslVerifyMode::PEER
            }
            ClientAuthPolicy::RequireAndVerifyClientCert | ClientAuthPolicy::RequireAnyClientCert => {
                SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
            }
        }
    }

    fn apply(self, builder: &mut SslContextBuilder) {
        let mode = self.verify_mode();
        match self {
            ClientAuthPolicy::RequestClientCert | ClientAuthPolicy::RequireAnyClientCert => {
                builder.set_verify_callback(mode, |_preverified, _ctx| true);
            }
            _ => builder.set_verify(mode),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("{}: file not found", path.display())]
    NotFound { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resolving {input}: {source}")]
    Secret {
        input: String,
        #[source]
        source: SecretError,
    },

    #[error("{}: failed to decode PEM: {message}", path.display())]
    PemDecode { path: PathBuf, message: String },

    #[error("{}: failed to decrypt private key: {source}", path.display())]
    Decrypt {
        path: PathBuf,
        #[source]
        source: ErrorStack,
    },

    #[error("{}: encrypted pem found but no password provided", path.display())]
    MissingPassword { path: PathBuf },

    #[error("{}: {message}", path.display())]
    KeyPair { path: PathBuf, message: String },

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// An ordered set of trusted certificates
#[derive(Clone, Default)]
pub struct CertPool {
    certs: Vec<X509>,
}

impl CertPool {
    /// Parse every certificate of a PEM bundle
    pub fn from_pem(pem: &[u8]) -> Result<Self, ErrorStack> {
        Ok(CertPool {
            certs: X509::stack_from_pem(pem)?,
        })
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &X509> {
        self.certs.iter()
    }

    /// Build an OpenSSL verification store from the pool
    pub fn to_store(&self) -> Result<X509Store, ErrorStack> {
        let mut builder = X509StoreBuilder::new()?;
        for cert in &self.certs {
            builder.add_cert(cert.clone())?;
        }
        Ok(builder.build())
    }

    fn der(&self) -> Vec<Vec<u8>> {
        self.certs.iter().filter_map(|c| c.to_der().ok()).collect()
    }
}

impl PartialEq for CertPool {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.der() == other.der()
    }
}

impl fmt::Debug for CertPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subjects: Vec<String> = self
            .certs
            .iter()
            .map(|c| super::cert::CertInfo::from_x509(c).subject)
            .collect();
        f.debug_struct("CertPool").field("subjects", &subjects).finish()
    }
}

/// Which side of the handshake a configuration serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    Server,
}

/// Materialized TLS configuration
#[derive(Clone, Default)]
pub struct ResolvedTlsConfig {
    pub(crate) role: Role,
    pub(crate) certificates: Vec<KeyPair>,
    pub(crate) root_cas: Option<CertPool>,
    pub(crate) client_cas: Option<CertPool>,
    pub(crate) client_auth: ClientAuthPolicy,
    pub(crate) min_version: Option<TlsVersion>,
    pub(crate) prefer_server_cipher_suites: bool,
    pub(crate) insecure_skip_verify: bool,
}

impl ResolvedTlsConfig {
    /// Empty client configuration (system roots, no client certificate)
    pub fn client() -> Self {
        Self::default()
    }

    /// Server configuration around a key pair
    pub fn server(key_pair: KeyPair) -> Self {
        ResolvedTlsConfig {
            role: Role::Server,
            certificates: vec![key_pair],
            min_version: Some(TlsVersion::Tls12),
            prefer_server_cipher_suites: true,
            ..Self::default()
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn certificates(&self) -> &[KeyPair] {
        &self.certificates
    }

    pub fn root_cas(&self) -> Option<&CertPool> {
        self.root_cas.as_ref()
    }

    pub fn client_cas(&self) -> Option<&CertPool> {
        self.client_cas.as_ref()
    }

    pub fn client_auth(&self) -> ClientAuthPolicy {
        self.client_auth
    }

    pub fn min_version(&self) -> Option<TlsVersion> {
        self.min_version
    }

    pub fn prefer_server_cipher_suites(&self) -> bool {
        self.prefer_server_cipher_suites
    }

    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Disable (or re-enable) peer certificate verification
    pub fn set_insecure_skip_verify(&mut self, insecure: bool) {
        self.insecure_skip_verify = insecure;
    }

    /// Build a client-side connector
    pub fn connector(&self) -> Result<SslConnector, TlsError> {
        if self.role != Role::Client {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        if let Some(version) = self.min_version {
            builder.set_min_proto_version(Some(version.to_openssl_version()))?;
        }

        // A configured root pool replaces the system roots
        if let Some(pool) = &self.root_cas {
            builder.set_cert_store(pool.to_store()?);
        }

        if let Some(pair) = self.certificates.first() {
            builder.set_certificate(&pair.certificate)?;
            builder.set_private_key(&pair.private_key)?;
            builder.check_private_key()?;
        }

        if self.insecure_skip_verify {
            builder.set_verify(SslVerifyMode::NONE);
        } else {
            builder.set_verify(SslVerifyMode::PEER);
        }

        Ok(builder.build())
    }

    /// Build a server-side acceptor
    pub fn acceptor(&self) -> Result<SslAcceptor, TlsError> {
        if self.role != Role::Server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }

        let pair = self.certificates.first().ok_or_else(|| {
            TlsError::InvalidConfig("server configuration has no certificate".to_string())
        })?;

        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
        builder.set_min_proto_version(Some(
            self.min_version.unwrap_or(TlsVersion::Tls12).to_openssl_version(),
        ))?;
        if self.prefer_server_cipher_suites {
            builder.set_options(SslOptions::CIPHER_SERVER_PREFERENCE);
        }

        builder.set_certificate(&pair.certificate)?;
        builder.set_private_key(&pair.private_key)?;
        builder.check_private_key()?;

        if let Some(pool) = &self.client_cas {
            for cert in pool.iter() {
                builder.cert_store_mut().add_cert(cert.clone())?;
                builder.add_client_ca(cert)?;
            }
        }
        self.client_auth.apply(&mut builder);

        Ok(builder.build())
    }

    /// Accept a TLS connection on `stream` (server side)
    pub fn accept(&self, stream: TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        let acceptor = self.acceptor()?;
        super::TlsSessionOps::accept(stream, &acceptor)
    }
}

impl fmt::Debug for ResolvedTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTlsConfig")
            .field("role", &self.role)
            .field("certificates", &self.certificates)
            .field("root_cas", &self.root_cas)
            .field("client_cas", &self.client_cas)
            .field("client_auth", &self.client_auth)
            .field("min_version", &self.min_version)
            .field("prefer_server_cipher_suites", &self.prefer_server_cipher_suites)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tls::fixtures::Fixtures;

    #[test]
    fn test_policy_verify_modes() {
        use ClientAuthPolicy::*;

        assert_eq!(NoClientCert.verify_mode(), SslVerifyMode::NONE);
        assert_eq!(RequestClientCert.verify_mode(), SslVerifyMode::PEER);
        assert_eq!(VerifyClientCertIfGiven.verify_mode(), SslVerifyMode::PEER);
        assert_eq!(
            RequireAndVerifyClientCert.verify_mode(),
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        );
        assert_eq!(
            RequireAnyClientCert.verify_mode(),
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        );
    }

    #[test]
    fn test_cert_pool_equality() {
        let fx = Fixtures::generate();
        let a = CertPool::from_pem(&fx.ca_cert_pem).unwrap();
        let b = CertPool::from_pem(&fx.ca_cert_pem).unwrap();
        let c = CertPool::from_pem(&fx.server_cert_pem).unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_client_config_builds_connector() {
        let mut config = ResolvedTlsConfig::client();
        config.set_insecure_skip_verify(true);
        assert!(config.connector().is_ok());
        assert!(config.acceptor().is_err());
    }
}
