//! Session Handler - STARTTLS state machine for one accepted connection
//!
//! ```text
//!   PLAIN ──(<starttls … <proceed)──▶ TLS ──(close / error)──▶ TERMINATED
//!     │                                                          ▲
//!     └───────────────────(close / error)────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::error::{Operation, Phase, RelayError, Result};
use super::pump::{self, Direction, PhaseConfig, PumpExit};
use super::tls_config::TlsContext;
use crate::config::Config;
use crate::logger::{RecordKind, SessionId, Transcript};

/// How a session ended when no error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub phase: Phase,
    pub closed_by: Direction,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.closed_by {
            Direction::ClientToServer => "client",
            Direction::ServerToClient => "server",
        };
        write!(f, "{} session closed by {}", self.phase, side)
    }
}

/// Drives one session from dialing the upstream to teardown
pub struct SessionHandler {
    id: SessionId,
    config: Arc<Config>,
    tls: TlsContext,
}

impl SessionHandler {
    pub fn new(id: SessionId, config: Arc<Config>, tls: TlsContext) -> Self {
        Self { id, config, tls }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Run the session to completion
    ///
    /// Both connections are owned by this call and are closed on return,
    /// whichever path ends it.
    pub async fn run<T>(&self, client: TcpStream, transcript: &mut T) -> Result<SessionEnd>
    where
        T: Transcript + ?Sized,
    {
        let server = TcpStream::connect(&self.config.server_addr)
            .await
            .map_err(|source| RelayError::Connect {
                addr: self.config.server_addr.clone(),
                source,
            })?;

        debug!(session = %self.id, server = %self.config.server_addr, "Connected to server");

        // One pipeline for both phases: censorship stays one-shot per session
        let mut pipeline = self.config.transform_pipeline();

        let (client, server) = match pump::run(
            client,
            server,
            PhaseConfig::plaintext(),
            &mut pipeline,
            &mut *transcript,
        )
        .await?
        {
            PumpExit::UpgradeApproved { client, server } => (client, server),
            PumpExit::Closed { by } => {
                return Ok(SessionEnd {
                    phase: Phase::Plaintext,
                    closed_by: by,
                })
            }
        };

        info!(session = %self.id, "Establishing TLS");
        transcript.record(RecordKind::Event, b"establishing TLS");

        let (client_tls, server_tls) = tokio::join!(
            self.tls.acceptor().accept(client),
            self.tls.connector().connect(self.tls.server_name(), server),
        );
        let client_tls =
            client_tls.map_err(|e| RelayError::handshake(Operation::ClientHandshake, e))?;
        let server_tls =
            server_tls.map_err(|e| RelayError::handshake(Operation::ServerHandshake, e))?;

        info!(
            session = %self.id,
            client_version = ?client_tls.get_ref().1.protocol_version(),
            server_version = ?server_tls.get_ref().1.protocol_version(),
            "TLS established on both sides"
        );

        match pump::run(
            client_tls,
            server_tls,
            PhaseConfig::tls(),
            &mut pipeline,
            &mut *transcript,
        )
        .await?
        {
            PumpExit::Closed { by } => Ok(SessionEnd {
                phase: Phase::Tls,
                closed_by: by,
            }),
            // Markers are not watched after the upgrade
            PumpExit::UpgradeApproved { .. } => Ok(SessionEnd {
                phase: Phase::Tls,
                closed_by: Direction::ServerToClient,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_end_display() {
        let end = SessionEnd {
            phase: Phase::Plaintext,
            closed_by: Direction::ClientToServer,
        };
        assert_eq!(end.to_string(), "plaintext session closed by client");

        let end = SessionEnd {
            phase: Phase::Tls,
            closed_by: Direction::ServerToClient,
        };
        assert_eq!(end.to_string(), "TLS session closed by server");
    }
}
