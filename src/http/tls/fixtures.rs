//! Certificate fixtures for tests
//!
//! Generates a throwaway CA plus server and client leaves signed by it. The
//! server leaf is valid for `localhost` and `127.0.0.1`.

use std::path::Path;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509NameBuilder, X509};

use super::material::KeyPair;

pub(crate) struct Fixtures {
    pub ca_cert_pem: Vec<u8>,
    pub server_cert_pem: Vec<u8>,
    pub server_key_pem: Vec<u8>,
    pub client_cert_pem: Vec<u8>,
    pub client_key_pem: Vec<u8>,
    server_rsa: Rsa<Private>,
}

impl Fixtures {
    pub fn generate() -> Self {
        let ca_rsa = Rsa::generate(2048).unwrap();
        let ca_key = PKey::from_rsa(ca_rsa).unwrap();
        let ca_cert = issue("debughttp test CA", &ca_key, None, true, 1);

        let server_rsa = Rsa::generate(2048).unwrap();
        let server_key = PKey::from_rsa(server_rsa.clone()).unwrap();
        let server_cert = issue("localhost", &server_key, Some((&ca_cert, &ca_key)), false, 2);

        let client_rsa = Rsa::generate(2048).unwrap();
        let client_key = PKey::from_rsa(client_rsa.clone()).unwrap();
        let client_cert = issue("debughttp client", &client_key, Some((&ca_cert, &ca_key)), false, 3);

        Fixtures {
            ca_cert_pem: ca_cert.to_pem().unwrap(),
            server_cert_pem: server_cert.to_pem().unwrap(),
            server_key_pem: server_rsa.private_key_to_pem().unwrap(),
            client_cert_pem: client_cert.to_pem().unwrap(),
            client_key_pem: client_rsa.private_key_to_pem().unwrap(),
            server_rsa,
        }
    }

    /// Server key as a legacy-encrypted `RSA PRIVATE KEY` block
    pub fn encrypted_server_key_pem(&self, password: &str) -> Vec<u8> {
        self.server_rsa
            .private_key_to_pem_passphrase(Cipher::aes_256_cbc(), password.as_bytes())
            .unwrap()
    }

    /// Server key as a PKCS#8 `PRIVATE KEY` block
    pub fn server_key_pkcs8_pem(&self) -> Vec<u8> {
        PKey::from_rsa(self.server_rsa.clone())
            .unwrap()
            .private_key_to_pem_pkcs8()
            .unwrap()
    }

    pub fn server_key_pair(&self) -> KeyPair {
        KeyPair {
            certificate: X509::from_pem(&self.server_cert_pem).unwrap(),
            private_key: PKey::from_rsa(self.server_rsa.clone()).unwrap(),
        }
    }

    /// Write `contents` under `dir` and return the path as a string
    pub fn write(&self, dir: &Path, name: &str, contents: &[u8]) -> String {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }
}

fn issue(
    common_name: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    is_ca: bool,
    serial: u32,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    if is_ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();
    } else {
        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_encipherment()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .append_extension(
                ExtendedKeyUsage::new()
                    .server_auth()
                    .client_auth()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let san = SubjectAlternativeName::new()
            .dns("localhost")
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(issuer.map(|(cert, _)| &**cert), None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }

    let signing_key = issuer.map(|(_, key)| key).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}
