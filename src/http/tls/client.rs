//! Client-side TLS material
//!
//! [`ClientTlsConfig`] is the deserializable description of what a client
//! trusts and which certificate it presents. It is initialized once and then
//! shared read-only with the transports built from it.

use std::fmt;

use serde::Deserialize;
use tracing::debug;

use super::config::{ResolvedTlsConfig, TlsError};
use super::material::{get_x509_key_pair, load_cert_pool};
use crate::secrets::SecretsResolver;

/// Client TLS settings
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientTlsConfig {
    /// CA bundle used to validate servers, replacing the system roots
    pub cacert_file: Option<String>,
    /// Client certificate (leaf first, optionally followed by its key)
    pub client_cert_file: Option<String>,
    /// Client private key when it is not in the certificate file
    pub client_key_file: Option<String>,
    /// Key password or secret-store URI
    pub client_key_password: Option<String>,

    #[serde(skip)]
    resolved: Option<ResolvedTlsConfig>,
    #[serde(skip)]
    initialized: bool,
}

impl ClientTlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cacert_file(mut self, path: impl Into<String>) -> Self {
        self.cacert_file = Some(path.into());
        self
    }

    pub fn client_cert_file(mut self, path: impl Into<String>) -> Self {
        self.client_cert_file = Some(path.into());
        self
    }

    pub fn client_key_file(mut self, path: impl Into<String>) -> Self {
        self.client_key_file = Some(path.into());
        self
    }

    pub fn client_key_password(mut self, password: impl Into<String>) -> Self {
        self.client_key_password = Some(password.into());
        self
    }

    /// Resolve the configured files into a TLS configuration.
    ///
    /// Runs once: after a successful call further calls return immediately.
    /// A failed call leaves the configuration uninitialized.
    pub fn init(&mut self, secrets: &dyn SecretsResolver) -> Result<(), TlsError> {
        if self.initialized {
            return Ok(());
        }

        let cacert = non_empty(&self.cacert_file);
        let client_cert = non_empty(&self.client_cert_file);

        if cacert.is_none() && client_cert.is_none() {
            debug!("no client TLS material configured");
            self.initialized = true;
            return Ok(());
        }

        let mut config = ResolvedTlsConfig::client();

        if let Some(path) = cacert {
            config.root_cas = Some(load_cert_pool(path, secrets)?);
        }

        if let Some(path) = client_cert {
            let pair = get_x509_key_pair(
                path,
                non_empty(&self.client_key_file),
                self.client_key_password.as_deref().unwrap_or_default(),
                secrets,
            )?;
            config.certificates = vec![pair];
        }

        self.resolved = Some(config);
        self.initialized = true;
        Ok(())
    }

    /// The resolved configuration, if any material was configured
    pub fn tls_config(&self) -> Option<&ResolvedTlsConfig> {
        self.resolved.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl fmt::Debug for ClientTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTlsConfig")
            .field("cacert_file", &self.cacert_file)
            .field("client_cert_file", &self.client_cert_file)
            .field("client_key_file", &self.client_key_file)
            .field(
                "client_key_password",
                &self.client_key_password.as_ref().map(|_| "<redacted>"),
            )
            .field("resolved", &self.resolved)
            .finish()
    }
}
