use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::relay::tls_config::UpstreamTrust;
use crate::relay::transform::{TokenSubstitution, TransformPipeline};

/// Default XMPP client port
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5222";

/// Relay configuration, built once at startup and shared read-only by every
/// session
#[derive(Debug, Clone)]
pub struct Config {
    // Network
    pub listen_addr: String,
    pub server_addr: String,
    /// TLS server name used toward the upstream
    pub server_name: String,

    // Transcript
    pub log_dir: Option<PathBuf>,
    pub censor: bool,

    // TLS key pair presented to clients (generated when unset)
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub upstream_trust: UpstreamTrust,

    // Address token substitution
    pub replace_local: Option<String>,
    pub replace_remote: Option<String>,
}

impl Config {
    /// Configuration with defaults for everything but the two addresses
    pub fn new(listen_addr: impl Into<String>, server_addr: impl Into<String>) -> Result<Self> {
        let server_addr = server_addr.into();
        let server_name = host_of(&server_addr)?;

        Ok(Config {
            listen_addr: listen_addr.into(),
            server_addr,
            server_name,
            log_dir: None,
            censor: false,
            cert_path: None,
            key_path: None,
            upstream_trust: UpstreamTrust::default(),
            replace_local: None,
            replace_remote: None,
        })
    }

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let listen_addr =
            env::var("RELAY_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        let server_addr = env::var("RELAY_SERVER")
            .context("RELAY_SERVER environment variable is required (host:port)")?;

        let mut config = Config::new(listen_addr, server_addr)?;

        if let Some(name) = non_empty_var("RELAY_UPSTREAM_SNI") {
            config.server_name = name;
        }

        config.log_dir = non_empty_var("RELAY_LOG_DIR").map(PathBuf::from);
        config.censor = env::var("RELAY_CENSOR")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .context("Invalid RELAY_CENSOR")?;

        config.cert_path = non_empty_var("TLS_CERT_PATH").map(PathBuf::from);
        config.key_path = non_empty_var("TLS_KEY_PATH").map(PathBuf::from);
        if config.cert_path.is_some() != config.key_path.is_some() {
            return Err(anyhow::anyhow!(
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together"
            ));
        }

        config.upstream_trust = env::var("RELAY_UPSTREAM_TRUST")
            .unwrap_or_else(|_| "insecure".to_string())
            .parse()
            .context("Invalid RELAY_UPSTREAM_TRUST")?;

        config.replace_local = non_empty_var("RELAY_REPLACE_LOCAL");
        config.replace_remote = non_empty_var("RELAY_REPLACE_REMOTE");

        if config.upstream_trust == UpstreamTrust::Insecure {
            tracing::info!(
                server = %config.server_addr,
                "Upstream certificate verification is disabled"
            );
        }

        Ok(config)
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_censor(mut self, censor: bool) -> Self {
        self.censor = censor;
        self
    }

    pub fn with_key_pair(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(cert.into());
        self.key_path = Some(key.into());
        self
    }

    pub fn with_upstream_trust(mut self, trust: UpstreamTrust) -> Self {
        self.upstream_trust = trust;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_replacement(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.replace_local = Some(local.into());
        self.replace_remote = Some(remote.into());
        self
    }

    /// Active only when both tokens are set
    pub fn substitution(&self) -> Option<TokenSubstitution> {
        match (&self.replace_local, &self.replace_remote) {
            (Some(local), Some(remote)) => {
                TokenSubstitution::new(local.as_bytes(), remote.as_bytes())
            }
            _ => None,
        }
    }

    /// Fresh pipeline for one session
    pub fn transform_pipeline(&self) -> TransformPipeline {
        TransformPipeline::new(self.substitution(), self.censor)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Host part of `host:port`, without IPv6 brackets
fn host_of(addr: &str) -> Result<String> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("Server address '{}' must be in host:port format", addr))?;

    port.parse::<u16>()
        .with_context(|| format!("Invalid port in server address '{}'", addr))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(anyhow::anyhow!("Server address '{}' has an empty host", addr));
    }
    Ok(host.to_string())
}
