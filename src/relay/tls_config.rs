//! TLS Configuration - both roles of the STARTTLS upgrade
//!
//! After the upgrade the relay is a TLS server toward the client, presenting the
//! configured (or generated) certificate, and a TLS client toward the upstream
//! server. Upstream verification is an explicit policy: by default the relay
//! accepts any upstream certificate so it can intercept servers without a
//! trusted chain.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::config::Config;
use crate::relay::error::RelayError;
use crate::tls::{load_key_pair, KeyPairMaterial};

/// TLS configuration errors
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("TLS configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("Unknown upstream trust policy: {0}")]
    UnknownTrustPolicy(String),
}

/// How the upstream server's certificate is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamTrust {
    /// Accept any certificate
    #[default]
    Insecure,
    /// Verify against the Mozilla root bundle
    WebPki,
}

impl FromStr for UpstreamTrust {
    type Err = TlsConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insecure" => Ok(UpstreamTrust::Insecure),
            "webpki" => Ok(UpstreamTrust::WebPki),
            other => Err(TlsConfigError::UnknownTrustPolicy(other.to_string())),
        }
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

/// Client-facing TLS config (relay acts as server)
pub struct ClientTlsConfig {
    config: Arc<ServerConfig>,
}

impl ClientTlsConfig {
    pub fn new(material: KeyPairMaterial) -> Result<Self, TlsConfigError> {
        let config = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&TLS12, &TLS13])
            .map_err(|e| TlsConfigError::ConfigError(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(material.cert_chain, material.private_key)
            .map_err(|e| TlsConfigError::ConfigError(e.to_string()))?;

        info!("Client-facing TLS config created");

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }
}

/// Upstream TLS config (relay acts as client)
pub struct UpstreamTlsConfig {
    config: Arc<ClientConfig>,
    trust: UpstreamTrust,
}

impl UpstreamTlsConfig {
    pub fn new(trust: UpstreamTrust) -> Result<Self, TlsConfigError> {
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&[&TLS12, &TLS13])
            .map_err(|e| TlsConfigError::ConfigError(e.to_string()))?;

        let config = match trust {
            UpstreamTrust::Insecure => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth(),
            UpstreamTrust::WebPki => {
                let mut root_store = RootCertStore::empty();
                root_store.extend(TLS_SERVER_ROOTS.iter().cloned());
                builder
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        info!(trust = ?trust, "Upstream TLS config created");

        Ok(Self {
            config: Arc::new(config),
            trust,
        })
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    pub fn trust(&self) -> UpstreamTrust {
        self.trust
    }
}

/// Verifier that skips certificate checks but still validates handshake
/// signatures against the presented certificate
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Parse a hostname or IP literal into a TLS server name
pub fn parse_server_name(hostname: &str) -> Result<ServerName<'static>, TlsConfigError> {
    ServerName::try_from(hostname.to_owned())
        .map_err(|e| TlsConfigError::InvalidServerName(format!("{}: {}", hostname, e)))
}

/// Everything a session needs to perform the upgrade
#[derive(Clone)]
pub struct TlsContext {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsContext {
    pub fn new(
        material: KeyPairMaterial,
        trust: UpstreamTrust,
        server_name: &str,
    ) -> Result<Self, TlsConfigError> {
        let client_facing = ClientTlsConfig::new(material)?;
        let upstream = UpstreamTlsConfig::new(trust)?;

        Ok(Self {
            acceptor: TlsAcceptor::from(client_facing.server_config()),
            connector: TlsConnector::from(upstream.client_config()),
            server_name: parse_server_name(server_name)?,
        })
    }

    /// Load key material and build both roles from the relay configuration
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let material = load_key_pair(config.cert_path.as_deref(), config.key_path.as_deref())
            .map_err(|e| RelayError::Certificate(format!("{:#}", e)))?;

        Self::new(material, config.upstream_trust, &config.server_name)
            .map_err(|e| RelayError::Certificate(e.to_string()))
    }

    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    pub fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    pub fn server_name(&self) -> ServerName<'static> {
        self.server_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::generate_default_key_pair;

    #[test]
    fn test_upstream_trust_parsing() {
        assert_eq!("insecure".parse::<UpstreamTrust>().unwrap(), UpstreamTrust::Insecure);
        assert_eq!("WebPKI".parse::<UpstreamTrust>().unwrap(), UpstreamTrust::WebPki);
        assert!("strict".parse::<UpstreamTrust>().is_err());
        assert_eq!(UpstreamTrust::default(), UpstreamTrust::Insecure);
    }

    #[test]
    fn test_parse_server_name() {
        assert!(parse_server_name("jabber.example").is_ok());
        assert!(parse_server_name("192.168.1.1").is_ok());
        assert!(parse_server_name("").is_err());
    }

    #[test]
    fn test_upstream_config_for_each_policy() {
        let insecure = UpstreamTlsConfig::new(UpstreamTrust::Insecure).unwrap();
        assert_eq!(insecure.trust(), UpstreamTrust::Insecure);

        let verified = UpstreamTlsConfig::new(UpstreamTrust::WebPki).unwrap();
        assert_eq!(verified.trust(), UpstreamTrust::WebPki);
    }

    #[test]
    fn test_context_with_default_key_pair() {
        let material = generate_default_key_pair().unwrap();
        let context = TlsContext::new(material, UpstreamTrust::Insecure, "localhost").unwrap();
        assert!(matches!(context.server_name(), ServerName::DnsName(_)));
    }
}
