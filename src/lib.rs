//! starttls-relay - intercepting relay for STARTTLS-upgraded XMPP streams
//!
//! The relay sits between a client and a real server and forwards bytes in
//! both directions. When it sees the client ask for `<starttls` and the
//! server answer `<proceed`, it does not pass the TLS handshake through:
//! it terminates TLS toward the client and opens a fresh TLS connection to
//! the server, so the post-upgrade plaintext can be logged and rewritten too.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use starttls_relay::{Config, Relay};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("127.0.0.1:5222", "jabber.example:5222")?
//!         .with_log_dir("/var/log/starttls-relay")
//!         .with_censor(true);
//!
//!     Relay::bind(config).await?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `config` - immutable relay configuration
//! - `tls` - key pair loading and the generated default certificate
//! - `logger` - per-session transcript on stdout and in `NNNN.log` files
//! - `relay` - acceptor, STARTTLS state machine, pump and transforms

pub mod config;
pub mod logger;
pub mod relay;
pub mod tls;

pub use config::Config;
pub use logger::{next_session_id, RecordKind, SessionId, SessionLogger, Transcript};
pub use relay::{
    Direction, PhaseConfig, PumpExit, Relay, RelayError, SessionEnd, SessionHandler,
    TransformPipeline, UpstreamTrust,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "starttls-relay");
    }
}
