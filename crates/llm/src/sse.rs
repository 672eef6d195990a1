//! SSE producer loop
//!
//! Drives a byte stream from an upstream HTTP response through a
//! [`StreamAdapter`] into a delta pipe. The loop guarantees the pipe sees at
//! most one terminal event and nothing after it, and that it stops as soon as
//! the request is cancelled or the consumer goes away.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chat_relay_core::pipe::PipeSender;
use chat_relay_core::streaming::{StreamAdapter, UnifiedStreamEvent};

/// Sends adapter output while tracking whether the stream has terminated.
struct Emitter {
    tx: PipeSender<UnifiedStreamEvent>,
    provider: &'static str,
    terminated: bool,
}

impl Emitter {
    /// Returns `false` once nothing more should be sent.
    async fn emit(&mut self, events: Vec<UnifiedStreamEvent>) -> bool {
        for event in events {
            if self.terminated {
                return false;
            }
            let terminal = event.is_terminal();
            if self.tx.send(event).await.is_err() {
                debug!("[{}] delta consumer closed, stopping producer", self.provider);
                self.terminated = true;
                return false;
            }
            if terminal {
                self.terminated = true;
            }
        }
        !self.terminated
    }

    async fn fail(&mut self, message: String) {
        let event = UnifiedStreamEvent::Error {
            message,
            code: Some("backend_unavailable".to_string()),
        };
        self.emit(vec![event]).await;
    }
}

/// Feed one complete line to the adapter. Returns `false` when the stream
/// has ended.
async fn process_line(
    adapter: &mut dyn StreamAdapter,
    emitter: &mut Emitter,
    raw: &[u8],
) -> bool {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return true;
    }
    match adapter.adapt(line) {
        Ok(events) => emitter.emit(events).await,
        Err(e) if e.is_recoverable() => {
            warn!("[{}] dropping malformed stream event: {}", emitter.provider, e);
            true
        }
        Err(e) => {
            warn!("[{}] upstream reported error: {}", emitter.provider, e);
            emitter.fail(e.to_string()).await;
            false
        }
    }
}

/// Pump `body` through `adapter` into `tx` until a terminal event, an
/// upstream error, cancellation, or consumer shutdown.
///
/// If the upstream ends without a terminal event the adapter is flushed and
/// a `Complete` is synthesized. Cancellation ends the pipe without a terminal
/// event; the consumer already knows why it stopped.
pub async fn pump_sse<S, E>(
    body: S,
    mut adapter: Box<dyn StreamAdapter>,
    tx: PipeSender<UnifiedStreamEvent>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let provider = adapter.provider_name();
    let mut emitter = Emitter {
        tx,
        provider,
        terminated: false,
    };
    let mut body = body;
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[{}] stream cancelled", provider);
                return;
            }
            _ = emitter.tx.closed() => {
                debug!("[{}] delta consumer gone", provider);
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(&bytes);
                // Split on raw newlines so multi-byte characters spanning
                // chunk boundaries stay intact.
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if !process_line(adapter.as_mut(), &mut emitter, &line[..pos]).await {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!("[{}] stream connection error: {}", provider, e);
                emitter.fail(format!("{} stream error: {}", provider, e)).await;
                return;
            }
            None => break,
        }
    }

    if !buffer.is_empty() {
        let rest = std::mem::take(&mut buffer);
        if !process_line(adapter.as_mut(), &mut emitter, &rest).await {
            return;
        }
    }

    let mut tail = adapter.finish();
    tail.push(UnifiedStreamEvent::Complete { stop_reason: None });
    emitter.emit(tail).await;
}
