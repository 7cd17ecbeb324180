//! Shared helpers for integration tests: throwaway PKI and loopback servers

#![allow(dead_code)]

use std::fmt;
use std::io::Write as _;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use debughttp::http::session::{FdSessionOps, SessionOps};
use debughttp::http::tls::ResolvedTlsConfig;
use debughttp::http::LogSink;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};

/// CA plus server and client leaves, and a client issued by an unrelated CA
pub struct Pki {
    pub ca_cert: Vec<u8>,
    pub server_cert: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_rsa: Rsa<Private>,
    pub stranger_cert: Vec<u8>,
    pub stranger_key: Vec<u8>,
}

impl Pki {
    pub fn generate() -> Self {
        let ca_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let ca = certificate("integration CA", &ca_key, None, 1);

        let server_rsa = Rsa::generate(2048).unwrap();
        let server_key = PKey::from_rsa(server_rsa.clone()).unwrap();
        let server = certificate("localhost", &server_key, Some((&ca, &ca_key)), 2);

        let client_rsa = Rsa::generate(2048).unwrap();
        let client_key = PKey::from_rsa(client_rsa.clone()).unwrap();
        let client = certificate("integration client", &client_key, Some((&ca, &ca_key)), 3);

        let other_ca_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let other_ca = certificate("unrelated CA", &other_ca_key, None, 1);
        let stranger_rsa = Rsa::generate(2048).unwrap();
        let stranger_key = PKey::from_rsa(stranger_rsa.clone()).unwrap();
        let stranger = certificate("stranger", &stranger_key, Some((&other_ca, &other_ca_key)), 2);

        Pki {
            ca_cert: ca.to_pem().unwrap(),
            server_cert: server.to_pem().unwrap(),
            server_key: server_rsa.private_key_to_pem().unwrap(),
            client_cert: client.to_pem().unwrap(),
            client_rsa,
            stranger_cert: stranger.to_pem().unwrap(),
            stranger_key: stranger_rsa.private_key_to_pem().unwrap(),
        }
    }

    pub fn client_key(&self) -> Vec<u8> {
        self.client_rsa.private_key_to_pem().unwrap()
    }

    pub fn encrypted_client_key(&self, password: &str) -> Vec<u8> {
        self.client_rsa
            .private_key_to_pem_passphrase(Cipher::aes_128_cbc(), password.as_bytes())
            .unwrap()
    }
}

fn certificate(
    common_name: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    serial: u32,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder
        .set_issuer_name(issuer.map_or(&*name, |(cert, _)| cert.subject_name()))
        .unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();

    match issuer {
        None => {
            builder
                .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
                .unwrap();
        }
        Some((ca, _)) => {
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
                .build(&builder.x509v3_context(Some(&**ca), None))
                .unwrap();
            builder.append_extension(san).unwrap();
        }
    }

    let signer = issuer.map_or(key, |(_, ca_key)| ca_key);
    builder.sign(signer, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Write `contents` to `dir/name`, returning the path
pub fn write(dir: &Path, name: &str, contents: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

/// Sink that keeps every record in order
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<String> {
        self.records.lock().unwrap().clone()
    }
}

impl LogSink for MemorySink {
    fn log_request(&self, args: fmt::Arguments<'_>) {
        self.records.lock().unwrap().push(args.to_string());
    }

    fn log_response(&self, args: fmt::Arguments<'_>) {
        self.records.lock().unwrap().push(args.to_string());
    }
}

/// What the server saw on one connection
#[derive(Debug, Default, Clone)]
pub struct Seen {
    pub targets: Vec<String>,
    pub peer: Option<String>,
    pub handshake_failed: bool,
}

/// Answer every request with `200 OK` and body `ok`
fn serve_session(session: &mut dyn SessionOps, seen: &mut Seen) {
    let mut head = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match session.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        head.extend_from_slice(&buf[..n]);

        while let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            let request = String::from_utf8_lossy(&head[..end]).into_owned();
            head.drain(..end + 4);
            if let Some(target) = request.split(' ').nth(1) {
                seen.targets.push(target.to_string());
            }
            let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
            if session.write(reply).is_err() {
                return;
            }
        }
    }
}

/// Plain HTTP server handling `connections` connections
pub fn serve_http(connections: usize) -> (SocketAddr, thread::JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut all = Vec::new();
        for stream in listener.incoming().take(connections) {
            let mut seen = Seen::default();
            let mut session = FdSessionOps::new(stream.unwrap());
            serve_session(&mut session, &mut seen);
            all.push(seen);
        }
        all
    });

    (addr, handle)
}

/// HTTPS server handling `connections` connections with `tls`
pub fn serve_https(
    tls: ResolvedTlsConfig,
    connections: usize,
) -> (SocketAddr, thread::JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let tls = Arc::new(tls);

    let handle = thread::spawn(move || {
        let mut all = Vec::new();
        for stream in listener.incoming().take(connections) {
            let mut seen = Seen::default();
            match tls.accept(stream.unwrap()) {
                Ok(mut session) => {
                    seen.peer = session.peer_certificate().map(|c| c.subject);
                    serve_session(&mut session, &mut seen);
                }
                Err(_) => seen.handshake_failed = true,
            }
            all.push(seen);
        }
        all
    });

    (addr, handle)
}

/// In-memory writer for `tracing_subscriber::fmt`
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
