//! Session Acceptor - accept loop and per-session supervision
//!
//! Listener setup and accept failures are fatal to the process. Everything
//! that goes wrong inside a session is caught at the boundary of its task,
//! written to that session's transcript and never reaches the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use super::error::{RelayError, Result};
use super::session::SessionHandler;
use super::tls_config::TlsContext;
use crate::config::Config;
use crate::logger::{next_session_id, SessionId, SessionLogger};

/// The intercepting relay
pub struct Relay {
    config: Arc<Config>,
    tls: TlsContext,
    listener: TcpListener,
    next_id: SessionId,
}

impl Relay {
    /// Load TLS material, pick the first session id and bind the listener
    pub async fn bind(config: Config) -> Result<Self> {
        let tls = TlsContext::from_config(&config)?;

        let next_id = next_session_id(config.log_dir.as_deref()).map_err(|source| {
            RelayError::LogDir {
                path: config.log_dir.clone().unwrap_or_default(),
                source,
            }
        })?;

        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| RelayError::Listen {
                addr: config.listen_addr.clone(),
                source,
            })?;

        info!(
            address = %config.listen_addr,
            server = %config.server_addr,
            first_session = %next_id,
            log_dir = ?config.log_dir,
            censor = config.censor,
            "Relay listening"
        );

        Ok(Self {
            config: Arc::new(config),
            tls,
            listener,
            next_id,
        })
    }

    /// Override the first session id
    pub fn starting_at(mut self, id: SessionId) -> Self {
        self.next_id = id;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Id the next accepted connection will get
    pub fn next_session_id(&self) -> SessionId {
        self.next_id
    }

    /// Accept connections until accepting fails
    pub async fn run(mut self) -> Result<()> {
        loop {
            let (client, peer_addr) = self.listener.accept().await.map_err(|e| {
                error!(error = %e, "Failed to accept connection");
                RelayError::Accept(e)
            })?;

            let id = self.next_id;
            self.next_id = id.next();

            info!(session = %id, peer = %peer_addr, "Accepted connection");
            self.start_session(id, client);
        }
    }

    fn start_session(&self, id: SessionId, client: TcpStream) {
        let mut logger = match SessionLogger::create(id, self.config.log_dir.as_deref()) {
            Ok(logger) => logger,
            Err(e) => {
                warn!(session = %id, error = %e, "Session startup failed");
                SessionLogger::console_only(id).event(&e.to_string());
                return;
            }
        };

        let handler = SessionHandler::new(id, Arc::clone(&self.config), self.tls.clone());

        tokio::spawn(async move {
            match handler.run(client, &mut logger).await {
                Ok(end) => {
                    info!(session = %id, "{}", end);
                    logger.event(&end.to_string());
                }
                Err(e) => {
                    warn!(session = %id, error = %e, "Session terminated");
                    logger.event(&e.to_string());
                }
            }
        });
    }
}
