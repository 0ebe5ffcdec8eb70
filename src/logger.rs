//! Session transcript
//!
//! Every forwarded chunk and every session lifecycle event becomes one line:
//!
//! ```text
//! <sequence> <timestamp> <direction> <escaped payload>
//! ```
//!
//! Lines go to stdout and, when a log directory is configured, to a file named
//! after the session sequence number (without the sequence column). Files are
//! created exclusively and never overwritten.

use chrono::{Local, SecondsFormat};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::relay::error::RelayError;
use crate::relay::pump::Direction;

/// Extension of per-session log files
pub const LOG_EXTENSION: &str = "log";

/// Monotonic session sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub const FIRST: SessionId = SessionId(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Identifier assigned to the following session
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// File name of this session's log, e.g. `0007.log`
    pub fn log_file_name(&self) -> String {
        format!("{:04}.{}", self.0, LOG_EXTENSION)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Parse a log file name back into its sequence number
pub fn parse_log_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(LOG_EXTENSION)?.strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// First session id that does not collide with existing logs
///
/// Without a log directory numbering starts at 1.
pub fn next_session_id(log_dir: Option<&Path>) -> io::Result<SessionId> {
    let Some(dir) = log_dir else {
        return Ok(SessionId::FIRST);
    };

    let mut next = SessionId::FIRST;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(n) = name.to_str().and_then(parse_log_file_name) {
            if n >= next.as_u64() {
                next = SessionId(n + 1);
            }
        }
    }
    Ok(next)
}

/// Transcript record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Chunk sent by the client
    Client,
    /// Chunk sent by the server
    Server,
    /// Session lifecycle or error event
    Event,
}

impl RecordKind {
    pub fn tag(&self) -> char {
        match self {
            RecordKind::Client => '?',
            RecordKind::Server => '!',
            RecordKind::Event => 'X',
        }
    }
}

impl From<Direction> for RecordKind {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::ClientToServer => RecordKind::Client,
            Direction::ServerToClient => RecordKind::Server,
        }
    }
}

/// Destination of transcript records
///
/// `payload` is already escaped and must not contain line breaks.
pub trait Transcript: Send {
    fn record(&mut self, kind: RecordKind, payload: &[u8]);
}

/// Transcript of one session
pub struct SessionLogger {
    id: SessionId,
    console: Box<dyn Write + Send>,
    file: Option<(PathBuf, File)>,
}

impl SessionLogger {
    /// Open the session log, creating `<dir>/<id>.log` exclusively when a
    /// directory is given
    pub fn create(id: SessionId, log_dir: Option<&Path>) -> Result<Self, RelayError> {
        let file = match log_dir {
            Some(dir) => {
                let path = dir.join(id.log_file_name());
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(|source| RelayError::LogCreate {
                        path: path.clone(),
                        source,
                    })?;
                Some((path, file))
            }
            None => None,
        };

        Ok(Self {
            id,
            console: Box::new(io::stdout()),
            file,
        })
    }

    /// Logger that only writes to the console
    pub fn console_only(id: SessionId) -> Self {
        Self {
            id,
            console: Box::new(io::stdout()),
            file: None,
        }
    }

    /// Replace the console stream
    pub fn with_console(mut self, console: Box<dyn Write + Send>) -> Self {
        self.console = console;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Path of the per-session file, if any
    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    /// Record a lifecycle event
    pub fn event(&mut self, message: &str) {
        let escaped = crate::relay::transform::escape(message.as_bytes());
        self.record(RecordKind::Event, &escaped);
    }
}

impl Transcript for SessionLogger {
    fn record(&mut self, kind: RecordKind, payload: &[u8]) {
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let body = format_record(&timestamp, kind, payload);

        let mut line = format!("{} ", self.id).into_bytes();
        line.extend_from_slice(&body);
        if let Err(e) = self.console.write_all(&line).and_then(|_| self.console.flush()) {
            warn!(session = %self.id, error = %e, "Failed to write transcript to console");
        }

        if let Some((path, file)) = self.file.as_mut() {
            if let Err(e) = file.write_all(&body) {
                warn!(
                    session = %self.id,
                    path = %path.display(),
                    error = %e,
                    "Failed to write session log"
                );
            }
        }
    }
}

/// `<timestamp> <tag> <payload>\n`
fn format_record(timestamp: &str, kind: RecordKind, payload: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(timestamp.len() + payload.len() + 4);
    line.extend_from_slice(timestamp.as_bytes());
    line.push(b' ');
    line.push(kind.tag() as u8);
    line.push(b' ');
    line.extend_from_slice(payload);
    line.push(b'\n');
    line
}
