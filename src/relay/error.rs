//! Relay error types
//!
//! Every session-level failure is tagged with the phase it happened in and the
//! operation that failed, so the acceptor can report a precise cause.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the STARTTLS upgrade
    Plaintext,
    /// After both sides were re-wrapped in TLS
    Tls,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Plaintext => f.write_str("plaintext"),
            Phase::Tls => f.write_str("TLS"),
        }
    }
}

/// Operation that failed within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    ClientRead,
    ServerRead,
    ClientWrite,
    ServerWrite,
    ClientHandshake,
    ServerHandshake,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operation::Connect => "connect to server",
            Operation::ClientRead => "read from client",
            Operation::ServerRead => "read from server",
            Operation::ClientWrite => "write to client",
            Operation::ServerWrite => "write to server",
            Operation::ClientHandshake => "complete TLS handshake with client",
            Operation::ServerHandshake => "complete TLS handshake with server",
        };
        f.write_str(text)
    }
}

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// Listener could not be set up
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// TLS key pair could not be loaded or built
    #[error("can not load TLS key pair: {0}")]
    Certificate(String),

    /// Log directory could not be scanned at startup
    #[error("can not scan log directory {}: {source}", path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Upstream dial failed
    #[error("plaintext session terminated: failed to connect to server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Read or write failure on an established endpoint
    #[error("{phase} session terminated: failed to {operation}: {source}")]
    Transport {
        phase: Phase,
        operation: Operation,
        #[source]
        source: io::Error,
    },

    /// TLS negotiation failure in either role
    #[error("{phase} session terminated: failed to {operation}: {source}")]
    Handshake {
        phase: Phase,
        operation: Operation,
        #[source]
        source: io::Error,
    },

    /// Per-session log file could not be created
    #[error("can not create session log {}: {source}", path.display())]
    LogCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RelayError {
    /// Create a transport error
    pub fn transport(phase: Phase, operation: Operation, source: io::Error) -> Self {
        Self::Transport {
            phase,
            operation,
            source,
        }
    }

    /// Create a handshake error
    pub fn handshake(operation: Operation, source: io::Error) -> Self {
        Self::Handshake {
            phase: Phase::Tls,
            operation,
            source,
        }
    }

    /// Errors that abort the whole process rather than a single session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Listen { .. }
                | RelayError::Accept(_)
                | RelayError::Certificate(_)
                | RelayError::LogDir { .. }
        )
    }

    /// Failed operation, when the error belongs to one
    pub fn operation(&self) -> Option<Operation> {
        match self {
            RelayError::Connect { .. } => Some(Operation::Connect),
            RelayError::Transport { operation, .. } | RelayError::Handshake { operation, .. } => {
                Some(*operation)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_message_names_phase_and_operation() {
        let err = RelayError::transport(
            Phase::Plaintext,
            Operation::ClientRead,
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        );
        assert_eq!(
            err.to_string(),
            "plaintext session terminated: failed to read from client: reset"
        );
        assert_eq!(err.operation(), Some(Operation::ClientRead));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_connect_error_names_phase_and_operation() {
        let err = RelayError::Connect {
            addr: "127.0.0.1:5222".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(
            err.to_string(),
            "plaintext session terminated: failed to connect to server 127.0.0.1:5222: refused"
        );
        assert_eq!(err.operation(), Some(Operation::Connect));
    }

    #[test]
    fn test_handshake_error_is_tls_phase() {
        let err = RelayError::handshake(
            Operation::ServerHandshake,
            io::Error::new(io::ErrorKind::InvalidData, "bad record"),
        );
        assert!(err.to_string().starts_with("TLS session terminated"));
        assert!(err.to_string().contains("handshake with server"));
    }

    #[test]
    fn test_fatal_classification() {
        let listen = RelayError::Listen {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(listen.is_fatal());
        assert!(RelayError::Certificate("missing".to_string()).is_fatal());

        let log = RelayError::LogCreate {
            path: PathBuf::from("/tmp/0001.log"),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        };
        assert!(!log.is_fatal());
        assert!(log.to_string().contains("0001.log"));
    }
}
