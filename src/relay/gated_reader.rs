//! Gated reader - one read at a time, each granted by the consumer
//!
//! A spawned task owns the read side of an endpoint. It performs a single read
//! into a fixed-size buffer, publishes the outcome, and then waits for
//! permission before reading again. Coordination uses two single-slot
//! channels: outcomes flow to the consumer, permissions flow back.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Bytes requested per read
pub const READ_BUFFER_SIZE: usize = 4000;

/// Result of one read attempt
#[derive(Debug)]
pub enum ReadOutcome {
    /// A chunk of at most [`READ_BUFFER_SIZE`] bytes, copied out of the read buffer
    Data(Bytes),
    /// The peer closed the stream
    Closed,
    /// The read failed
    Failed(io::Error),
}

/// Reader task handle
///
/// Dropping the handle aborts the task, which releases the read half even
/// when a read is still pending.
#[derive(Debug)]
pub struct GatedReader<R> {
    outcomes: mpsc::Receiver<ReadOutcome>,
    permits: mpsc::Sender<bool>,
    task: Option<JoinHandle<R>>,
}

impl<R> GatedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Spawn the reader task; the first read starts immediately
    pub fn spawn(reader: R) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(1);
        let (permit_tx, mut permit_rx) = mpsc::channel::<bool>(1);

        let task = tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = vec![0u8; READ_BUFFER_SIZE];

            loop {
                let outcome = match reader.read(&mut buf).await {
                    Ok(0) => ReadOutcome::Closed,
                    Ok(n) => ReadOutcome::Data(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => ReadOutcome::Failed(e),
                };
                let last = !matches!(outcome, ReadOutcome::Data(_));

                if outcome_tx.send(outcome).await.is_err() || last {
                    break;
                }

                match permit_rx.recv().await {
                    Some(true) => continue,
                    _ => {
                        trace!("reader stopped by consumer");
                        break;
                    }
                }
            }

            reader
        });

        Self {
            outcomes: outcome_rx,
            permits: permit_tx,
            task: Some(task),
        }
    }
}

impl<R> GatedReader<R> {
    /// Wait for the outcome of the current read
    ///
    /// Returns `None` once the task has exited without publishing anything.
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<ReadOutcome> {
        self.outcomes.recv().await
    }

    /// Grant the next read
    pub async fn resume(&self) {
        // A closed channel means the task is gone; the next `next()` reports it.
        let _ = self.permits.send(true).await;
    }

    /// Deny further reads and take the reader back
    ///
    /// Must only be called after an outcome was received and before
    /// `resume`, so the task is parked on its permission channel and no
    /// bytes are in flight.
    pub async fn stop(mut self) -> io::Result<R> {
        let _ = self.permits.send(false).await;
        match self.task.take() {
            Some(task) => task.await.map_err(io::Error::other),
            None => Err(io::Error::other("reader task already released")),
        }
    }
}

impl<R> Drop for GatedReader<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
