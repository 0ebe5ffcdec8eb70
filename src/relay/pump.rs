//! Bidirectional Pump - relays one phase of a session
//!
//! Each direction has its own [`GatedReader`]. The coordinator below is the only
//! place that transforms, logs and writes, so at most one write is in flight
//! and chunks of one direction are handled strictly in read order. The next
//! read on a direction is granted only after its previous chunk was fully
//! forwarded.
//!
//! ```text
//!   client ──read──▶ [gated reader] ──outcome──▶ coordinator ──write──▶ server
//!   client ◀─write── coordinator ◀──outcome── [gated reader] ◀──read── server
//! ```
//!
//! With upgrade markers watched, a client chunk containing `<starttls` parks
//! the client reader, and a following server chunk containing `<proceed` ends
//! the pump with both raw streams handed back for the TLS upgrade. Markers
//! are matched inside a single chunk only.

use std::io;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

use super::error::{Operation, Phase, RelayError, Result};
use super::gated_reader::{GatedReader, ReadOutcome};
use super::transform::{contains, TransformPipeline, CLIENT_TLS_MARKER, SERVER_TLS_MARKER};
use crate::logger::{RecordKind, Transcript};

/// Direction a chunk travels in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    fn read_operation(&self) -> Operation {
        match self {
            Direction::ClientToServer => Operation::ClientRead,
            Direction::ServerToClient => Operation::ServerRead,
        }
    }

    fn write_operation(&self) -> Operation {
        match self {
            Direction::ClientToServer => Operation::ServerWrite,
            Direction::ServerToClient => Operation::ClientWrite,
        }
    }
}

/// Per-phase pump settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseConfig {
    pub phase: Phase,
    pub watch_upgrade_markers: bool,
}

impl PhaseConfig {
    /// Plaintext phase, watching for the STARTTLS exchange
    pub fn plaintext() -> Self {
        Self {
            phase: Phase::Plaintext,
            watch_upgrade_markers: true,
        }
    }

    /// Phase after the upgrade; runs until termination
    pub fn tls() -> Self {
        Self {
            phase: Phase::Tls,
            watch_upgrade_markers: false,
        }
    }
}

/// Why a pump invocation ended without an error
#[derive(Debug)]
pub enum PumpExit<C, S> {
    /// Server approved STARTTLS; both raw streams are returned intact
    UpgradeApproved { client: C, server: S },
    /// One side closed its stream
    Closed { by: Direction },
}

/// Relay bytes between `client` and `server` until a stop condition
///
/// Any read or write failure on either side aborts both directions.
pub async fn run<C, S, T>(
    client: C,
    server: S,
    phase: PhaseConfig,
    pipeline: &mut TransformPipeline,
    transcript: &mut T,
) -> Result<PumpExit<C, S>>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: Transcript + ?Sized,
{
    let (client_read, mut client_write) = split(client);
    let (server_read, mut server_write) = split(server);

    let mut client_reader = Some(GatedReader::spawn(client_read));
    let mut server_reader = GatedReader::spawn(server_read);
    // Client read half, once reads were denied after `<starttls`
    let mut parked_client: Option<ReadHalf<C>> = None;

    loop {
        tokio::select! {
            outcome = next_outcome(&mut client_reader) => {
                let direction = Direction::ClientToServer;
                let chunk = match accept_outcome(outcome, direction, phase.phase)? {
                    Some(chunk) => chunk,
                    None => return Ok(PumpExit::Closed { by: direction }),
                };

                let forwarded = forward(
                    chunk, direction, phase.phase, pipeline, transcript, &mut server_write,
                ).await?;

                if phase.watch_upgrade_markers && contains(&forwarded, CLIENT_TLS_MARKER) {
                    debug!("Client requested TLS, pausing client reads");
                    if let Some(reader) = client_reader.take() {
                        parked_client = Some(release(reader, direction, phase.phase).await?);
                    }
                    continue;
                }

                if let Some(reader) = client_reader.as_ref() {
                    reader.resume().await;
                }
            }

            outcome = server_reader.next() => {
                let direction = Direction::ServerToClient;
                let chunk = match accept_outcome(outcome, direction, phase.phase)? {
                    Some(chunk) => chunk,
                    None => return Ok(PumpExit::Closed { by: direction }),
                };

                let forwarded = forward(
                    chunk, direction, phase.phase, pipeline, transcript, &mut client_write,
                ).await?;

                // Approval only counts once the client asked for the upgrade
                if phase.watch_upgrade_markers && contains(&forwarded, SERVER_TLS_MARKER) {
                    if let Some(client_read) = parked_client.take() {
                        debug!("Server approved TLS, ending plaintext phase");
                        let server_read = release(server_reader, direction, phase.phase).await?;
                        return Ok(PumpExit::UpgradeApproved {
                            client: rejoin(client_read, client_write),
                            server: rejoin(server_read, server_write),
                        });
                    }
                }

                server_reader.resume().await;
            }
        }
    }
}

/// Outcome of a reader that may already be parked
async fn next_outcome<R>(reader: &mut Option<GatedReader<R>>) -> Option<ReadOutcome> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

/// `Some(chunk)` for data, `None` for an orderly close
fn accept_outcome(
    outcome: Option<ReadOutcome>,
    direction: Direction,
    phase: Phase,
) -> Result<Option<bytes::Bytes>> {
    match outcome {
        Some(ReadOutcome::Data(chunk)) => Ok(Some(chunk)),
        Some(ReadOutcome::Closed) => {
            debug!(direction = ?direction, "Stream closed");
            Ok(None)
        }
        Some(ReadOutcome::Failed(e)) => {
            Err(RelayError::transport(phase, direction.read_operation(), e))
        }
        None => Err(RelayError::transport(
            phase,
            direction.read_operation(),
            io::Error::other("reader task ended unexpectedly"),
        )),
    }
}

/// Transform, log and write one chunk; returns the bytes that were forwarded
async fn forward<W, T>(
    chunk: bytes::Bytes,
    direction: Direction,
    phase: Phase,
    pipeline: &mut TransformPipeline,
    transcript: &mut T,
    peer: &mut W,
) -> Result<bytes::Bytes>
where
    W: AsyncWrite + Unpin,
    T: Transcript + ?Sized,
{
    let out = pipeline.apply(direction, chunk);
    transcript.record(RecordKind::from(direction), &out.record);

    debug!(
        direction = ?direction,
        bytes = out.forward.len(),
        "Forwarding chunk"
    );

    let write_op = direction.write_operation();
    peer.write_all(&out.forward)
        .await
        .map_err(|e| RelayError::transport(phase, write_op, e))?;
    peer.flush()
        .await
        .map_err(|e| RelayError::transport(phase, write_op, e))?;

    Ok(out.forward)
}

async fn release<R>(reader: GatedReader<R>, direction: Direction, phase: Phase) -> Result<R> {
    reader
        .stop()
        .await
        .map_err(|e| RelayError::transport(phase, direction.read_operation(), e))
}

fn rejoin<T: AsyncRead + AsyncWrite + Unpin>(read: ReadHalf<T>, write: WriteHalf<T>) -> T {
    read.unsplit(write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[derive(Default)]
    struct Records(Vec<(RecordKind, Vec<u8>)>);

    impl Transcript for Records {
        fn record(&mut self, kind: RecordKind, payload: &[u8]) {
            self.0.push((kind, payload.to_vec()));
        }
    }

    #[test]
    fn test_phase_configs() {
        assert!(PhaseConfig::plaintext().watch_upgrade_markers);
        assert_eq!(PhaseConfig::plaintext().phase, Phase::Plaintext);
        assert!(!PhaseConfig::tls().watch_upgrade_markers);
        assert_eq!(PhaseConfig::tls().phase, Phase::Tls);
    }

    #[tokio::test]
    async fn test_relays_and_reports_close() {
        let (mut client, client_end) = duplex(1024);
        let (mut server, server_end) = duplex(1024);
        let mut pipeline = TransformPipeline::passthrough();
        let mut records = Records::default();

        let pump = tokio::spawn(async move {
            let exit = run(
                client_end,
                server_end,
                PhaseConfig::tls(),
                &mut pipeline,
                &mut records,
            )
            .await;
            (exit, records)
        });

        client.write_all(b"<message>hi</message>").await.unwrap();
        let mut buf = [0u8; 21];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"<message>hi</message>");

        drop(client);
        let (exit, records) = pump.await.unwrap();
        assert!(matches!(
            exit.unwrap(),
            PumpExit::Closed {
                by: Direction::ClientToServer
            }
        ));
        assert_eq!(records.0.len(), 1);
        assert_eq!(records.0[0].0, RecordKind::Client);
    }

    #[tokio::test]
    async fn test_server_close_ends_pump() {
        let (_client, client_end) = duplex(1024);
        let (server, server_end) = duplex(1024);
        let mut pipeline = TransformPipeline::passthrough();
        let mut records = Records::default();

        drop(server);

        let exit = run(
            client_end,
            server_end,
            PhaseConfig::plaintext(),
            &mut pipeline,
            &mut records,
        )
        .await;

        assert!(matches!(
            exit.unwrap(),
            PumpExit::Closed {
                by: Direction::ServerToClient
            }
        ));
        assert!(records.0.is_empty());
    }

    #[tokio::test]
    async fn test_proceed_without_starttls_is_not_an_upgrade() {
        let (mut client, client_end) = duplex(1024);
        let (mut server, server_end) = duplex(1024);
        let mut pipeline = TransformPipeline::passthrough();
        let mut records = Records::default();

        let pump = tokio::spawn(async move {
            run(
                client_end,
                server_end,
                PhaseConfig::plaintext(),
                &mut pipeline,
                &mut records,
            )
            .await
            .map(|exit| matches!(exit, PumpExit::Closed { .. }))
        });

        server.write_all(b"<proceed/>").await.unwrap();
        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"<proceed/>");

        drop(server);
        assert!(pump.await.unwrap().unwrap());
    }
}
