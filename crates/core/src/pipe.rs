//! Bounded Pipe
//!
//! A single-producer, single-consumer bounded queue used wherever one task
//! hands a stream of items to another (backend producer → classifier
//! consumer, pipeline → SSE transport).
//!
//! Contract:
//! - The sender closes. [`PipeSender::close`] consumes the sender, so a
//!   second close or a send after close does not type-check.
//! - Dropping either end closes the pipe. A send to a closed pipe returns
//!   [`PipeClosed`] instead of panicking.
//! - The receiver can close early (consumer gone); the producer observes this
//!   through [`PipeSender::closed`] and stops.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Returned when sending into a pipe whose receiver is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeClosed;

impl std::fmt::Display for PipeClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipe closed")
    }
}

impl std::error::Error for PipeClosed {}

/// Create a bounded pipe with the given capacity (minimum 1).
pub fn pipe<T>(capacity: usize) -> (PipeSender<T>, PipeReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeSender { tx }, PipeReceiver { rx })
}

/// Producing end. Not `Clone`: there is exactly one producer per pipe.
#[derive(Debug)]
pub struct PipeSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> PipeSender<T> {
    /// Send one item, waiting for capacity.
    pub async fn send(&self, item: T) -> Result<(), PipeClosed> {
        self.tx.send(item).await.map_err(|_| PipeClosed)
    }

    /// Resolves once the receiving end is closed or dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the pipe from the producing side. Items already queued are
    /// still delivered; the receiver then sees end-of-stream.
    pub fn close(self) {
        drop(self)
    }
}

/// Consuming end.
#[derive(Debug)]
pub struct PipeReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> PipeReceiver<T> {
    /// Receive the next item; `None` once the sender has closed and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop accepting items. Queued items can still be drained.
    pub fn close(&mut self) {
        self.rx.close()
    }
}

impl<T> Stream for PipeReceiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}
