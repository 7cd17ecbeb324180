//! Secret-store indirection
//!
//! Configuration values that name a file or carry a password may either be
//! literal values or secret-store URIs (`secret://...`). This module defines
//! the resolver capability the TLS layer consumes and a uniform dereference
//! helper that turns either form into a concrete value exactly once.
//!
//! Two resolvers ship with the crate:
//!
//! - [`NoSecrets`] recognizes the URI shape but refuses to resolve it
//! - [`StaticSecrets`] serves secrets from an in-memory table; file-valued
//!   secrets are materialized into a private temporary directory that lives
//!   as long as the resolver

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;
use zeroize::Zeroizing;

/// Prefix marking a value as a secret-store reference
pub const SECRET_URI_PREFIX: &str = "secret://";

/// Secret resolution errors
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret store not configured, cannot resolve {0}")]
    Unsupported(String),

    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret {0} does not reference a file")]
    NotAFile(String),

    #[error("I/O error materializing secret: {0}")]
    Io(#[from] std::io::Error),
}

/// A resolved handle on a single secret
pub trait Decrypter {
    /// Whether the secret is file-valued
    fn is_file(&self) -> bool;

    /// Materialize the secret.
    ///
    /// File-valued secrets return the path of the materialized file, inline
    /// secrets return the secret itself.
    fn decrypt(&self) -> Result<Zeroizing<String>, SecretError>;
}

/// Secret-store capability
pub trait SecretsResolver: Send + Sync {
    /// Whether `value` is a secret-store URI
    fn is_encrypted_secret(&self, value: &str) -> bool {
        value.starts_with(SECRET_URI_PREFIX)
    }

    /// Open the secret named by `uri`
    fn new_decrypter(&self, uri: &str) -> Result<Box<dyn Decrypter + '_>, SecretError>;
}

/// What a dereferenced value is expected to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// A path on the local filesystem
    File,
    /// An inline value such as a password
    Value,
}

/// Resolve `value` to a concrete string.
///
/// Literal values are returned as-is. URIs are resolved once through
/// `resolver`; with [`SecretKind::File`] the secret must be file-valued and
/// the materialized path is returned.
pub fn dereference(
    resolver: &dyn SecretsResolver,
    value: &str,
    kind: SecretKind,
) -> Result<Zeroizing<String>, SecretError> {
    if !resolver.is_encrypted_secret(value) {
        return Ok(Zeroizing::new(value.to_string()));
    }

    let decrypter = resolver.new_decrypter(value)?;
    if kind == SecretKind::File && !decrypter.is_file() {
        return Err(SecretError::NotAFile(value.to_string()));
    }

    debug!(uri = value, ?kind, "resolving secret");
    decrypter.decrypt()
}

/// Resolver for deployments without a secret store
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSecrets;

impl SecretsResolver for NoSecrets {
    fn new_decrypter(&self, uri: &str) -> Result<Box<dyn Decrypter + '_>, SecretError> {
        Err(SecretError::Unsupported(uri.to_string()))
    }
}

#[derive(Clone)]
enum Entry {
    Inline(Zeroizing<String>),
    File(Zeroizing<Vec<u8>>),
}

/// In-memory secret store
///
/// File-valued entries are written to disk the first time they are
/// resolved and the same path is handed out afterwards.
#[derive(Clone, Default)]
pub struct StaticSecrets {
    entries: HashMap<String, Entry>,
    materialized: Arc<Mutex<Materialized>>,
}

#[derive(Default)]
struct Materialized {
    dir: Option<tempfile::TempDir>,
    paths: HashMap<String, PathBuf>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inline secret (for example a key password)
    pub fn with_value(mut self, uri: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries
            .insert(uri.into(), Entry::Inline(Zeroizing::new(value.into())));
        self
    }

    /// Register a file-valued secret with the given contents
    pub fn with_file(mut self, uri: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.entries
            .insert(uri.into(), Entry::File(Zeroizing::new(contents.into())));
        self
    }

    fn materialize(&self, uri: &str, contents: &[u8]) -> Result<PathBuf, SecretError> {
        let mut state = self
            .materialized
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(path) = state.paths.get(uri) {
            return Ok(path.clone());
        }

        let dir = match &state.dir {
            Some(dir) => dir.path().to_path_buf(),
            None => {
                let created = tempfile::tempdir()?;
                let path = created.path().to_path_buf();
                state.dir = Some(created);
                path
            }
        };

        let path = dir.join(format!("secret-{}", state.paths.len()));
        let mut file = fs::File::create(&path)?;
        file.write_all(contents)?;
        file.sync_all()?;

        state.paths.insert(uri.to_string(), path.clone());
        Ok(path)
    }
}

impl fmt::Debug for StaticSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSecrets")
            .field("uris", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct StaticDecrypter<'a> {
    store: &'a StaticSecrets,
    uri: String,
    entry: Entry,
}

impl Decrypter for StaticDecrypter<'_> {
    fn is_file(&self) -> bool {
        matches!(self.entry, Entry::File(_))
    }

    fn decrypt(&self) -> Result<Zeroizing<String>, SecretError> {
        match &self.entry {
            Entry::Inline(value) => Ok(value.clone()),
            Entry::File(contents) => {
                let path = self.store.materialize(&self.uri, contents)?;
                Ok(Zeroizing::new(path.to_string_lossy().into_owned()))
            }
        }
    }
}

impl SecretsResolver for StaticSecrets {
    fn new_decrypter(&self, uri: &str) -> Result<Box<dyn Decrypter + '_>, SecretError> {
        let entry = self
            .entries
            .get(uri)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(uri.to_string()))?;

        Ok(Box::new(StaticDecrypter {
            store: self,
            uri: uri.to_string(),
            entry,
        }))
    }
}
