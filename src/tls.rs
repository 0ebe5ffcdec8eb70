use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Names covered by the generated default certificate
pub const DEFAULT_CERT_NAMES: &[&str] = &["localhost", "127.0.0.1"];

/// Certificate chain plus private key presented to clients
pub struct KeyPairMaterial {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl std::fmt::Debug for KeyPairMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairMaterial")
            .field("certificates", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

/// Load TLS certificates and private key from PEM files
pub fn load_certs_and_key(cert_path: &Path, key_path: &Path) -> Result<KeyPairMaterial> {
    let cert_file = File::open(cert_path)
        .with_context(|| format!("Failed to open certificate {}", cert_path.display()))?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid certificate PEM in {}", cert_path.display()))?;

    if cert_chain.is_empty() {
        anyhow::bail!("No certificates found in {}", cert_path.display());
    }

    // PKCS#8, PKCS#1 and SEC1 keys are all accepted
    let key_file = File::open(key_path)
        .with_context(|| format!("Failed to open private key {}", key_path.display()))?;
    let mut key_reader = BufReader::new(key_file);
    let private_key = private_key(&mut key_reader)
        .with_context(|| format!("Invalid private key PEM in {}", key_path.display()))?
        .ok_or_else(|| anyhow::anyhow!("No private keys found in {}", key_path.display()))?;

    Ok(KeyPairMaterial {
        cert_chain,
        private_key,
    })
}

/// Generate a self-signed key pair for `localhost`
pub fn generate_default_key_pair() -> Result<KeyPairMaterial> {
    let names: Vec<String> = DEFAULT_CERT_NAMES.iter().map(|n| n.to_string()).collect();
    let certified = rcgen::generate_simple_self_signed(names)
        .context("Failed to generate default certificate")?;

    Ok(KeyPairMaterial {
        cert_chain: vec![certified.cert.der().clone()],
        private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        )),
    })
}

/// Configured key pair, or the generated default when no paths are given
pub fn load_key_pair(cert_path: Option<&Path>, key_path: Option<&Path>) -> Result<KeyPairMaterial> {
    match (cert_path, key_path) {
        (Some(cert), Some(key)) => {
            let material = load_certs_and_key(cert, key).context("can not load TLS key pair")?;
            info!(cert = %cert.display(), "Loaded TLS key pair");
            Ok(material)
        }
        (None, None) => {
            info!("No TLS key pair configured, using generated self-signed certificate");
            generate_default_key_pair()
        }
        _ => anyhow::bail!("TLS certificate and key paths must be given together"),
    }
}
