//! STARTTLS interception
//!
//! - `acceptor` accepts connections and supervises one task per session
//! - `session` runs the plaintext phase, the TLS upgrade and the TLS phase
//! - `pump` relays both directions of one phase
//! - `gated_reader` performs one read at a time per direction
//! - `transform` rewrites chunks for forwarding and for the transcript
//! - `tls_config` builds the client-facing and upstream TLS roles

pub mod acceptor;
pub mod error;
pub mod gated_reader;
pub mod pump;
pub mod session;
pub mod tls_config;
pub mod transform;

pub use acceptor::Relay;
pub use error::{Operation, Phase, RelayError};
pub use gated_reader::{GatedReader, ReadOutcome, READ_BUFFER_SIZE};
pub use pump::{Direction, PhaseConfig, PumpExit};
pub use session::{SessionEnd, SessionHandler};
pub use tls_config::{ClientTlsConfig, TlsConfigError, TlsContext, UpstreamTlsConfig, UpstreamTrust};
pub use transform::{
    escape, TokenSubstitution, Transformed, TransformPipeline, CENSORED_AUTH, CLIENT_AUTH_MARKER,
    CLIENT_TLS_MARKER, SERVER_TLS_MARKER,
};
