//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use starttls_relay::relay::tls_config::{ClientTlsConfig, UpstreamTlsConfig};
use starttls_relay::relay::transform::contains;
use starttls_relay::tls::generate_default_key_pair;
use starttls_relay::UpstreamTrust;

/// Read until `needle` shows up; returns everything read
pub async fn read_until<R: AsyncRead + Unpin>(stream: &mut R, needle: &[u8]) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];
    while !contains(&collected, needle) {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("timed out waiting for data")
            .expect("read failed");
        assert!(
            n > 0,
            "stream closed before {:?} arrived",
            String::from_utf8_lossy(needle)
        );
        collected.extend_from_slice(&buf[..n]);
    }
    collected
}

/// TLS acceptor for a fake upstream server
pub fn server_acceptor() -> TlsAcceptor {
    let material = generate_default_key_pair().unwrap();
    TlsAcceptor::from(ClientTlsConfig::new(material).unwrap().server_config())
}

/// TLS connector for a test client that trusts whatever the relay presents
pub fn insecure_connector() -> TlsConnector {
    TlsConnector::from(
        UpstreamTlsConfig::new(UpstreamTrust::Insecure)
            .unwrap()
            .client_config(),
    )
}

/// Wait until `path` exists and contains a line matching `predicate`
pub async fn wait_for_line(path: &Path, predicate: impl Fn(&str) -> bool) -> String {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if contents.lines().any(&predicate) {
                return contents;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no matching line appeared in {}", path.display());
}
