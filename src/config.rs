//! YAML configuration
//!
//! Settings records for the client and server sides. File paths written
//! relative to a configuration file are taken relative to that file's
//! directory; secret-store URIs are left for the resolver.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::http::tls::{ClientTlsConfig, ServerTlsConfig};
use crate::logging::LogProperties;
use crate::secrets::SECRET_URI_PREFIX;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings for the debug HTTP client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    #[serde(flatten)]
    pub tls: ClientTlsConfig,
    /// Skip server certificate verification
    pub insecure: bool,
    pub logging: LogProperties,
}

/// Settings for a TLS-capable server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub ssl: ServerTlsConfig,
    pub logging: LogProperties,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".to_string(),
            port: 8443,
            ssl: ServerTlsConfig::default(),
            logging: LogProperties::default(),
        }
    }
}

/// Records holding file paths that may be relative
pub trait RelativePaths {
    fn resolve_relative_to(&mut self, base: &Path);
}

impl RelativePaths for ClientSettings {
    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [
            &mut self.tls.cacert_file,
            &mut self.tls.client_cert_file,
            &mut self.tls.client_key_file,
        ]
        .into_iter()
        .flatten()
        {
            resolve_path(path, base);
        }
    }
}

impl RelativePaths for ServerSettings {
    fn resolve_relative_to(&mut self, base: &Path) {
        resolve_path(&mut self.ssl.cert_file, base);
        resolve_path(&mut self.ssl.key_file, base);
        if let Some(ca) = &mut self.ssl.ca_cert_file {
            resolve_path(ca, base);
        }
    }
}

fn resolve_path(path: &mut String, base: &Path) {
    if path.is_empty() || path.starts_with(SECRET_URI_PREFIX) || Path::new(path).is_absolute() {
        return;
    }
    *path = base.join(&*path).to_string_lossy().into_owned();
}

/// Parse a yaml configuration file into a struct
pub fn parse_config_file<T: DeserializeOwned>(location: &str) -> Result<T, ConfigError> {
    let file = std::fs::File::open(location).map_err(|source| ConfigError::Io {
        path: location.to_string(),
        source,
    })?;
    serde_yaml::from_reader(file).map_err(|source| ConfigError::Yaml {
        path: location.to_string(),
        source,
    })
}

/// Parse a configuration file and anchor its relative paths to its directory
pub fn load_config_file<T>(location: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + RelativePaths,
{
    let mut config: T = parse_config_file(location)?;
    if let Some(dir) = Path::new(location).parent() {
        config.resolve_relative_to(dir);
    }
    Ok(config)
}
