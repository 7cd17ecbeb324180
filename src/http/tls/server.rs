//! Server-side TLS material
//!
//! [`ServerTlsConfig`] describes the identity a server presents and how it
//! treats client certificates. [`ServerTlsConfig::resolve`] turns it into a
//! [`ResolvedTlsConfig`] ready to build an acceptor.

use std::fmt;

use serde::Deserialize;
use tracing::debug;

use super::config::{ClientAuthPolicy, ResolvedTlsConfig, TlsError};
use super::material::{get_x509_key_pair, load_cert_pool};
use crate::secrets::SecretsResolver;

/// Client certificate mode as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthMode {
    #[default]
    None,
    Request,
    Want,
    Need,
    Any,
}

impl ClientAuthMode {
    pub fn policy(self) -> ClientAuthPolicy {
        match self {
            ClientAuthMode::None => ClientAuthPolicy::NoClientCert,
            ClientAuthMode::Request => ClientAuthPolicy::RequestClientCert,
            ClientAuthMode::Want => ClientAuthPolicy::VerifyClientCertIfGiven,
            ClientAuthMode::Need => ClientAuthPolicy::RequireAndVerifyClientCert,
            ClientAuthMode::Any => ClientAuthPolicy::RequireAnyClientCert,
        }
    }
}

/// Server TLS settings
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerTlsConfig {
    pub enabled: bool,
    pub cert_file: String,
    pub key_file: String,
    /// Key password or secret-store URI
    pub key_password: String,
    /// CAs for client certificates; the certificate file is used when unset
    #[serde(rename = "CAcertFile")]
    pub ca_cert_file: Option<String>,
    pub client_auth: ClientAuthMode,
}

impl ServerTlsConfig {
    /// Resolve into a server configuration, or `None` when TLS is disabled
    pub fn resolve(
        &self,
        secrets: &dyn SecretsResolver,
    ) -> Result<Option<ResolvedTlsConfig>, TlsError> {
        if !self.enabled {
            debug!("server TLS disabled");
            return Ok(None);
        }

        let key_file = Some(self.key_file.as_str()).filter(|k| !k.is_empty());
        let pair = get_x509_key_pair(&self.cert_file, key_file, &self.key_password, secrets)?;
        let mut config = ResolvedTlsConfig::server(pair);

        if self.client_auth != ClientAuthMode::None {
            let ca_file = self
                .ca_cert_file
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or(&self.cert_file);
            config.client_cas = Some(load_cert_pool(ca_file, secrets)?);
            config.client_auth = self.client_auth.policy();
        }

        debug!(client_auth = ?config.client_auth, "server TLS resolved");
        Ok(Some(config))
    }
}

impl fmt::Debug for ServerTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTlsConfig")
            .field("enabled", &self.enabled)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("key_password", &"<redacted>")
            .field("ca_cert_file", &self.ca_cert_file)
            .field("client_auth", &self.client_auth)
            .finish()
    }
}
