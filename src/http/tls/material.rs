//! Certificate and key material loading
//!
//! Resolves file paths (literal or secret-store URIs), reads PEM files and
//! assembles X.509 key pairs, decrypting legacy-encrypted RSA keys on the
//! way.
//!
//! Only `RSA PRIVATE KEY` blocks are treated as keys. PKCS#8 `PRIVATE KEY`
//! blocks land in the non-key list like certificates do.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::X509;
use pem::Pem;
use tracing::debug;
use zeroize::Zeroizing;

use super::cert::CertInfo;
use super::config::{CertPool, TlsError};
use crate::secrets::{dereference, SecretKind, SecretsResolver};

/// Block type carrying a PKCS#1 RSA private key
const RSA_PRIVATE_KEY: &str = "RSA PRIVATE KEY";

/// Legacy PEM encryption (`Proc-Type: 4,ENCRYPTED`)
fn is_encrypted(block: &Pem) -> bool {
    block
        .headers()
        .get("Proc-Type")
        .is_some_and(|value| value.contains("ENCRYPTED"))
}

/// A leaf certificate and its private key
#[derive(Clone)]
pub struct KeyPair {
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        let certs = match (self.certificate.to_der(), other.certificate.to_der()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        let keys = match (
            self.private_key.private_key_to_der(),
            other.private_key.private_key_to_der(),
        ) {
            (Ok(a), Ok(b)) => Zeroizing::new(a) == Zeroizing::new(b),
            _ => false,
        };
        certs && keys
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("certificate", &CertInfo::from_x509(&self.certificate))
            .finish_non_exhaustive()
    }
}

/// Resolve `path` and make sure it exists.
///
/// Secret-store URIs must reference a file secret; the materialized path is
/// returned. A missing file is [`TlsError::NotFound`], any other probe
/// failure is [`TlsError::Io`].
pub fn check_file_exists(path: &str, secrets: &dyn SecretsResolver) -> Result<PathBuf, TlsError> {
    let resolved = dereference(secrets, path, SecretKind::File).map_err(|source| {
        TlsError::Secret {
            input: path.to_string(),
            source,
        }
    })?;
    let resolved = PathBuf::from(resolved.as_str());

    match fs::metadata(&resolved) {
        Ok(_) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TlsError::NotFound { path: resolved }),
        Err(source) => Err(TlsError::Io {
            path: resolved,
            source,
        }),
    }
}

fn read_material(path: &str, secrets: &dyn SecretsResolver) -> Result<(PathBuf, Vec<u8>), TlsError> {
    let path = check_file_exists(path, secrets)?;
    match fs::read(&path) {
        Ok(data) => Ok((path, data)),
        Err(source) => Err(TlsError::Io { path, source }),
    }
}

/// Load every certificate of a PEM bundle into a pool
pub fn load_cert_pool(path: &str, secrets: &dyn SecretsResolver) -> Result<CertPool, TlsError> {
    let (path, data) = read_material(path, secrets)?;

    let pool = CertPool::from_pem(&data).map_err(|e| TlsError::PemDecode {
        path: path.clone(),
        message: e.to_string(),
    })?;
    if pool.is_empty() {
        return Err(TlsError::PemDecode {
            path,
            message: "no certificates found".to_string(),
        });
    }

    debug!(path = %path.display(), certs = pool.len(), "loaded CA pool");
    Ok(pool)
}

/// Key password, resolved at most once and only when needed
struct KeyPassword<'a> {
    raw: &'a str,
    secrets: &'a dyn SecretsResolver,
    resolved: Option<Zeroizing<String>>,
}

impl<'a> KeyPassword<'a> {
    fn new(raw: &'a str, secrets: &'a dyn SecretsResolver) -> Self {
        KeyPassword {
            raw,
            secrets,
            resolved: None,
        }
    }

    fn get(&mut self, path: &Path) -> Result<&str, TlsError> {
        let value = match self.resolved.take() {
            Some(value) => value,
            None => self.resolve(path)?,
        };
        Ok(self.resolved.insert(value).as_str())
    }

    fn resolve(&self, path: &Path) -> Result<Zeroizing<String>, TlsError> {
        if self.secrets.is_encrypted_secret(self.raw) {
            dereference(self.secrets, self.raw, SecretKind::Value).map_err(|source| {
                TlsError::Secret {
                    input: "key password".to_string(),
                    source,
                }
            })
        } else if self.raw.is_empty() {
            Err(TlsError::MissingPassword {
                path: path.to_path_buf(),
            })
        } else {
            Ok(Zeroizing::new(self.raw.to_string()))
        }
    }
}

/// Blocks collected while walking one or more PEM files
#[derive(Default)]
struct PemDecoding {
    blocks: Vec<Pem>,
    private_key: Option<Zeroizing<String>>,
}

impl PemDecoding {
    fn absorb(&mut self, path: &Path, data: &[u8], password: &mut KeyPassword<'_>) -> Result<(), TlsError> {
        let blocks = pem::parse_many(data).map_err(|e| TlsError::PemDecode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        for block in blocks {
            if block.tag() != RSA_PRIVATE_KEY {
                self.blocks.push(block);
                continue;
            }

            let der = if is_encrypted(&block) {
                let passphrase = password.get(path)?;
                let encrypted = Zeroizing::new(pem::encode(&block));
                let decrypt_err = |source| TlsError::Decrypt {
                    path: path.to_path_buf(),
                    source,
                };
                let rsa = Rsa::private_key_from_pem_passphrase(encrypted.as_bytes(), passphrase.as_bytes())
                    .map_err(decrypt_err)?;
                Zeroizing::new(rsa.private_key_to_der().map_err(decrypt_err)?)
            } else {
                Zeroizing::new(block.into_contents())
            };

            // A later key block replaces an earlier one
            let clear = Pem::new(RSA_PRIVATE_KEY, der.to_vec());
            self.private_key = Some(Zeroizing::new(pem::encode(&clear)));
        }

        Ok(())
    }

    fn into_key_pair(self, path: &Path) -> Result<KeyPair, TlsError> {
        let key_pair_err = |message: String| TlsError::KeyPair {
            path: path.to_path_buf(),
            message,
        };

        let key_pem = self
            .private_key
            .ok_or_else(|| key_pair_err("missing private key".to_string()))?;
        let leaf = self
            .blocks
            .first()
            .ok_or_else(|| key_pair_err("failed to find certificate PEM data".to_string()))?;

        let certificate = X509::from_der(leaf.contents())
            .map_err(|e| key_pair_err(format!("failed to parse certificate: {}", e)))?;
        let private_key = PKey::private_key_from_pem(key_pem.as_bytes())
            .map_err(|e| key_pair_err(format!("failed to parse private key: {}", e)))?;

        let public_key = certificate
            .public_key()
            .map_err(|e| key_pair_err(format!("failed to read certificate public key: {}", e)))?;
        if !public_key.public_eq(&private_key) {
            return Err(key_pair_err("private key does not match public key".to_string()));
        }

        Ok(KeyPair {
            certificate,
            private_key,
        })
    }
}

/// Load an X.509 key pair.
///
/// The private key is taken from `cert_file` when it carries one, otherwise
/// from `key_file`. Encrypted keys are decrypted with `key_password`, which
/// may itself be a secret-store URI. Only the first non-key block of
/// `cert_file` becomes the certificate, so a chain must list the leaf first.
pub fn get_x509_key_pair(
    cert_file: &str,
    key_file: Option<&str>,
    key_password: &str,
    secrets: &dyn SecretsResolver,
) -> Result<KeyPair, TlsError> {
    let mut password = KeyPassword::new(key_password, secrets);
    let mut decoding = PemDecoding::default();

    let (cert_path, data) = read_material(cert_file, secrets)?;
    decoding.absorb(&cert_path, &data, &mut password)?;

    if decoding.private_key.is_none() {
        if let Some(key_file) = key_file.filter(|k| !k.is_empty()) {
            let (key_path, data) = read_material(key_file, secrets)?;
            let mut key_decoding = PemDecoding::default();
            key_decoding.absorb(&key_path, &data, &mut password)?;
            decoding.private_key = key_decoding.private_key;
        }
    }

    let pair = decoding.into_key_pair(&cert_path)?;
    debug!(
        cert = %cert_path.display(),
        subject = %CertInfo::from_x509(&pair.certificate).subject,
        "loaded key pair"
    );
    Ok(pair)
}
